//! Application notifications.

use alloc::boxed::Box;

use crate::{err::Result, host::HostId, instance::AttachedDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    Connection,
    Disconnection,
    /// The device has several configurations; call
    /// [`UserHandle::select_configuration`] to pick one, otherwise the
    /// configuration that was read during enumeration is used.
    SelectConfiguration,
    ClassSelected,
}

pub type UserCallback = Box<dyn FnMut(&mut UserHandle<'_>, UserEvent) + Send>;

/// View of the notifying instance handed to the application callback.
pub struct UserHandle<'a> {
    pub(crate) id: HostId,
    pub(crate) device: &'a mut AttachedDevice,
    pub(crate) configuration: &'a mut Option<u8>,
}

impl UserHandle<'_> {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn device(&self) -> &AttachedDevice {
        self.device
    }

    pub fn select_interface(&mut self, index: u8) -> Result<()> {
        self.device.select_interface(index)
    }

    /// `bConfigurationValue` sent with SET_CONFIGURATION.
    pub fn select_configuration(&mut self, value: u8) {
        *self.configuration = Some(value);
    }
}
