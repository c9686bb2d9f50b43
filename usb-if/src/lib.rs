#![cfg_attr(not(test), no_std)]

pub mod descriptor;
pub mod err;
pub mod host;

pub use host::{EndpointType, Port, Speed};
