use num_enum::{FromPrimitive, IntoPrimitive};

/// USB Device Class Codes as defined by USB-IF
/// https://www.usb.org/defined-class-codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BaseClass {
    /// Use class information in the Interface Descriptors
    UseInterface = 0x00,
    /// Audio device
    Audio = 0x01,
    /// Communications and CDC Control
    Communication = 0x02,
    /// HID (Human Interface Device)
    Hid = 0x03,
    /// Printer device
    Printer = 0x07,
    /// Mass Storage device
    MassStorage = 0x08,
    /// Hub device
    Hub = 0x09,
    /// CDC-Data
    CdcData = 0x0A,
    /// Video device
    Video = 0x0E,
    /// Wireless Controller
    Wireless = 0xE0,
    /// Miscellaneous
    Miscellaneous = 0xEF,
    /// Other/Unknown class codes
    #[num_enum(catch_all)]
    Other(u8),
    /// Application Specific
    Application = 0xFE,
    /// Vendor Specific, used by most cellular modems for their AT/data ports
    Vendor = 0xFF,
}

impl BaseClass {
    pub fn code(self) -> u8 {
        self.into()
    }
}
