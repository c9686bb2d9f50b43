//! Decoded standard descriptors.
//!
//! Byte-level parsing is done by the control-transfer engine; the core only
//! reads the decoded fields.

mod class_code;

pub use class_code::BaseClass;

use crate::host::EndpointType;

/// Interface descriptor slots held by one configuration.
pub const MAX_INTERFACES: usize = 10;
/// Endpoint descriptor slots held by one interface.
pub const MAX_ENDPOINTS: usize = 5;

pub const DEVICE_DESC_LEN: u8 = 18;
pub const CONFIGURATION_DESC_LEN: u16 = 9;
/// Enough of the device descriptor to learn `max_packet_size_0`.
pub const DEVICE_DESC_HEADER_LEN: u8 = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_string_index: u8,
    pub product_string_index: u8,
    pub serial_number_string_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn class(&self) -> BaseClass {
        BaseClass::from(self.class)
    }

    pub fn manufacturer_string(&self) -> Option<u8> {
        non_zero(self.manufacturer_string_index)
    }

    pub fn product_string(&self) -> Option<u8> {
        non_zero(self.product_string_index)
    }

    pub fn serial_number_string(&self) -> Option<u8> {
        non_zero(self.serial_number_string_index)
    }
}

fn non_zero(index: u8) -> Option<u8> {
    if index == 0 { None } else { Some(index) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint address, bit 7 set for IN.
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn transfer_type(&self) -> EndpointType {
        EndpointType::from(self.attributes & 0x03)
    }

    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
    pub endpoints: [EndpointDescriptor; MAX_ENDPOINTS],
}

impl InterfaceDescriptor {
    pub fn class(&self) -> BaseClass {
        BaseClass::from(self.class)
    }

    /// Endpoints actually declared by the interface.
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        let n = (self.num_endpoints as usize).min(MAX_ENDPOINTS);
        &self.endpoints[..n]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub string_index: u8,
    pub attributes: u8,
    pub max_power: u8,
    pub interfaces: [InterfaceDescriptor; MAX_INTERFACES],
}

impl ConfigurationDescriptor {
    /// Interfaces actually declared by the configuration.
    ///
    /// Slots past `num_interfaces` keep their default value and are never
    /// visible through this slice.
    pub fn interfaces(&self) -> &[InterfaceDescriptor] {
        let n = (self.num_interfaces as usize).min(MAX_INTERFACES);
        &self.interfaces[..n]
    }

    /// Index of the first interface matching every given field, `None` fields
    /// match anything.
    pub fn find_interface(
        &self,
        class: Option<u8>,
        subclass: Option<u8>,
        protocol: Option<u8>,
    ) -> Option<u8> {
        self.interfaces()
            .iter()
            .position(|itf| {
                class.is_none_or(|c| itf.class == c)
                    && subclass.is_none_or(|s| itf.subclass == s)
                    && protocol.is_none_or(|p| itf.protocol == p)
            })
            .map(|idx| idx as u8)
    }

    pub fn find_interface_index(&self, interface_number: u8, alt_setting: u8) -> Option<u8> {
        self.interfaces()
            .iter()
            .position(|itf| {
                itf.interface_number == interface_number && itf.alternate_setting == alt_setting
            })
            .map(|idx| idx as u8)
    }
}
