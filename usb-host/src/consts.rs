/// Device addresses available per host tree (7-bit addressing, 0 is the default address).
pub const MAX_NUM_DEVICE: usize = 127;

/// Logical channels provided by the controller.
pub const MAX_PIPES: usize = 15;

/// Class drivers one host instance can hold.
pub const MAX_SUPPORTED_CLASS: usize = 4;

/// Downstream ports (children) one host instance can fan out to.
pub const MAX_CHILDREN: usize = 4;

/// Scratch buffer for string descriptors.
pub const MAX_DATA_BUFFER: usize = 0x200;

/// Longest string descriptor requested during enumeration.
pub const MAX_STRING_LEN: usize = 0xFF;

/// Endpoint 0 packet size used before the device descriptor is known.
pub const MPS_DEFAULT: u8 = 0x40;

pub const EP0_OUT: u8 = 0x00;
pub const EP0_IN: u8 = 0x80;
