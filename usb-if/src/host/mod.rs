//! Collaborator interfaces consumed by the host core.

use num_enum::{FromPrimitive, IntoPrimitive};

use crate::{
    descriptor::{ConfigurationDescriptor, DeviceDescriptor},
    err::{ControlResult, TransferError},
};

/// Bus speed of the attached device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Speed {
    Low = 0,
    #[default]
    Full = 1,
    High = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EndpointType {
    #[num_enum(default)]
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Physical attachment point of a host instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    /// The controller's own root port.
    Root,
    /// Downstream port `port` of the hub served by host instance `hub`.
    Downstream { hub: usize, port: u8 },
}

/// Index of a logical channel inside the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub u8);

impl PipeId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// Parameters a pipe is (re)opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeConfig {
    /// Endpoint address, bit 7 set for IN.
    pub endpoint: u8,
    pub device_address: u8,
    pub speed: Speed,
    pub kind: EndpointType,
    pub max_packet_size: u16,
}

/// The pair of pipes serving endpoint 0 of one device, plus the parameters
/// they are currently opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPipe {
    pub pipe_in: PipeId,
    pub pipe_out: PipeId,
    pub device_address: u8,
    pub speed: Speed,
    pub max_packet_size: u8,
}

/// Low-level transport: port control, power and raw channel setup.
///
/// The notification half of the transport (connect, disconnect, port
/// enabled/disabled, frame tick) is delivered to the core through its event
/// handler, not through this trait.
pub trait TransportOp {
    fn init(&mut self) -> Result<(), TransferError>;
    fn start(&mut self);
    fn stop(&mut self);
    fn drive_vbus(&mut self, on: bool);
    fn reset_port(&mut self, port: Port);
    fn speed(&mut self, port: Port) -> Speed;
    fn open_pipe(&mut self, pipe: PipeId, config: &PipeConfig) -> Result<(), TransferError>;
    fn close_pipe(&mut self, pipe: PipeId);
}

/// Control-transfer engine.
///
/// Every call is non-blocking: it either starts or continues the request and
/// returns `WouldBlock` until the status stage completes. The decoded result
/// is written into the caller's descriptor or buffer.
pub trait ControlOp {
    fn get_device_descriptor(
        &mut self,
        ep0: &ControlPipe,
        len: u8,
        desc: &mut DeviceDescriptor,
    ) -> ControlResult;

    fn get_configuration_descriptor(
        &mut self,
        ep0: &ControlPipe,
        len: u16,
        desc: &mut ConfigurationDescriptor,
    ) -> ControlResult;

    /// Fetches string descriptor `index` decoded to ASCII, returns the number
    /// of bytes written to `buff`.
    fn get_string_descriptor(
        &mut self,
        ep0: &ControlPipe,
        index: u8,
        buff: &mut [u8],
    ) -> ControlResult<usize>;

    fn set_address(&mut self, ep0: &ControlPipe, address: u8) -> ControlResult;

    fn set_configuration(&mut self, ep0: &ControlPipe, value: u8) -> ControlResult;
}
