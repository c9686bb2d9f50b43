//! Class driver capability and the per-instance registry of drivers.

use alloc::{sync::Arc, vec::Vec};

use usb_if::{
    EndpointType,
    descriptor::{BaseClass, ConfigurationDescriptor},
    host::{PipeConfig, PipeId, TransportOp},
};

use crate::{
    consts::MAX_SUPPORTED_CLASS,
    err::{Result, USBError},
    host::HostId,
    instance::AttachedDevice,
    pipe::PipeRegistry,
};

/// Class driver capability.
///
/// One driver value may serve several host instances (children inherit their
/// parent's registry), so per-device state must be keyed by [`HostId`].
///
/// `frame_tick` is called from interrupt context and may run concurrently
/// with `background` for the same instance; the driver synchronizes whatever
/// state the two share. It must not block.
pub trait ClassOp: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Matched against the class code of interface 0.
    fn class_code(&self) -> BaseClass;

    fn init(&self, host: &mut ClassHost<'_>) -> Result<()>;

    fn deinit(&self, host: &mut ClassHost<'_>);

    /// Class-specific setup. `WouldBlock` until done.
    fn requests(&self, host: &mut ClassHost<'_>) -> nb::Result<(), USBError>;

    /// Steady-state work, called once per task-level pass.
    fn background(&self, host: &mut ClassHost<'_>);

    fn frame_tick(&self, frame: &FrameContext);
}

/// What a class driver sees on a frame tick.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub host: HostId,
    pub timer: u32,
}

/// Registered drivers in registration order.
#[derive(Clone, Default)]
pub struct ClassRegistry {
    drivers: Vec<Arc<dyn ClassOp>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Vec::with_capacity(MAX_SUPPORTED_CLASS),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn ClassOp>) -> Result<()> {
        if self.drivers.len() >= MAX_SUPPORTED_CLASS {
            error!("Max class number reached, {} rejected", driver.name());
            return Err(USBError::RegistryFull);
        }
        self.drivers.push(driver);
        Ok(())
    }

    /// First registered driver for `class_code`.
    pub fn select(&self, class_code: u8) -> Option<Arc<dyn ClassOp>> {
        self.drivers
            .iter()
            .find(|d| d.class_code().code() == class_code)
            .cloned()
    }

    /// Driver for the class of the configuration's first interface.
    pub fn select_for_device(&self, cfg: &ConfigurationDescriptor) -> Option<Arc<dyn ClassOp>> {
        self.select(cfg.interfaces[0].class)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ClassOp>> {
        self.drivers.iter()
    }
}

/// Access a class driver gets to the instance it serves.
pub struct ClassHost<'a> {
    pub(crate) id: HostId,
    pub(crate) is_child: bool,
    pub(crate) timer: u32,
    pub(crate) device: &'a mut AttachedDevice,
    pub(crate) pipes: &'a mut PipeRegistry,
    pub(crate) transport: &'a mut dyn TransportOp,
}

impl ClassHost<'_> {
    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// Frame ticks seen by this instance so far.
    pub fn timer(&self) -> u32 {
        self.timer
    }

    pub fn device(&self) -> &AttachedDevice {
        self.device
    }

    pub fn alloc_pipe(&mut self, ep_addr: u8) -> Result<PipeId> {
        self.pipes.alloc(self.id.index(), ep_addr)
    }

    /// Opens `pipe` towards endpoint `ep_addr` of the attached device.
    pub fn open_pipe(
        &mut self,
        pipe: PipeId,
        ep_addr: u8,
        kind: EndpointType,
        max_packet_size: u16,
    ) -> Result<()> {
        let config = PipeConfig {
            endpoint: ep_addr,
            device_address: self.device.address,
            speed: self.device.speed,
            kind,
            max_packet_size,
        };
        self.pipes.open(self.transport, self.id.index(), pipe, &config)
    }

    /// Halts the channel, the pipe stays allocated.
    pub fn close_pipe(&mut self, pipe: PipeId) -> Result<()> {
        if self.pipes.owner(pipe) != Some(self.id.index()) {
            return Err(USBError::InvalidPipe(pipe.0));
        }
        self.transport.close_pipe(pipe);
        Ok(())
    }

    pub fn free_pipe(&mut self, pipe: PipeId) -> Result<()> {
        self.pipes.free(self.transport, self.id.index(), pipe)
    }

    pub fn find_interface(
        &self,
        class: Option<u8>,
        subclass: Option<u8>,
        protocol: Option<u8>,
    ) -> Option<u8> {
        self.device.config_desc.find_interface(class, subclass, protocol)
    }

    pub fn find_interface_index(&self, interface_number: u8, alt_setting: u8) -> Option<u8> {
        self.device
            .config_desc
            .find_interface_index(interface_number, alt_setting)
    }

    pub fn select_interface(&mut self, index: u8) -> Result<()> {
        self.device.select_interface(index)
    }
}
