#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate log;

pub use usb_if::descriptor::*;
pub use usb_if::err::*;
pub use usb_if::host::{ControlOp, ControlPipe, PipeConfig, PipeId, TransportOp};
pub use usb_if::{EndpointType, Port, Speed};

mod address;
mod class;
mod config;
pub mod consts;
mod enumeration;
pub mod err;
mod event;
mod host;
mod instance;
mod osal;
mod pipe;
mod user;

pub use address::AddressPool;
pub use class::{ClassHost, ClassOp, ClassRegistry, FrameContext};
pub use config::{HostConfig, RetryPolicy};
pub use enumeration::EnumState;
pub use err::{Result, USBError};
pub use event::{EventHandler, HostEvent, PortSignal};
pub use host::{HostId, UsbHost};
pub use instance::{AttachedDevice, HostInstance, HostState};
pub use osal::KernelOp;
pub use pipe::PipeRegistry;
pub use user::{UserCallback, UserEvent, UserHandle};
