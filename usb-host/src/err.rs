pub use usb_if::err::{ControlError, ControlStage, TransferError};

pub type Result<T = ()> = core::result::Result<T, USBError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum USBError {
    #[error("Class registry full")]
    RegistryFull,
    #[error("No free device address")]
    AddressExhausted,
    #[error("No free pipe")]
    NoFreePipe,
    #[error("Pipe {0} is not allocated")]
    InvalidPipe(u8),
    #[error("Unknown host instance")]
    InvalidHost,
    #[error("Interface {0} does not exist")]
    InvalidInterface(u8),
    #[error("Hub port out of range")]
    ChildLimitReached,
    #[error("Hub port already in use")]
    PortOccupied,
    #[error("Host instance limit reached")]
    InstanceLimitReached,
    #[error("Enumeration failed: {0}")]
    EnumerationFailed(ControlError),
    #[error("Set configuration failed: {0}")]
    ConfigurationFailed(ControlError),
    #[error("Class driver init failed")]
    ClassInitFailed,
    #[error("No class driver matches the device")]
    NoClassFound,
    #[error("Transport error: {0}")]
    Transport(#[from] TransferError),
}
