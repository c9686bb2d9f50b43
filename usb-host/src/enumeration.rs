//! Descriptor-gathering sequence run after a device was attached.

use usb_if::{
    descriptor::{CONFIGURATION_DESC_LEN, DEVICE_DESC_HEADER_LEN, DEVICE_DESC_LEN},
    err::ControlResult,
    host::ControlPipe,
};

use crate::{
    config::RetryPolicy,
    consts::MAX_STRING_LEN,
    err::USBError,
    event::HostEvent,
    host::HostId,
    instance::{AttachedDevice, Bus, ControlBook},
};

/// Enumeration sub-state, one control request each.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EnumState {
    /// First 8 bytes of the device descriptor.
    #[default]
    Start,
    FullDeviceDescriptor,
    SetAddress,
    ConfigDescriptorHeader,
    ConfigDescriptorFull,
    ManufacturerString,
    ProductString,
    SerialNumberString,
}

pub(crate) struct Enumerator<'a> {
    pub id: HostId,
    pub state: &'a mut EnumState,
    pub ctrl: &'a mut ControlBook,
    pub device: &'a mut AttachedDevice,
}

impl Enumerator<'_> {
    /// Runs the current sub-state once.
    ///
    /// `WouldBlock` while requests are in flight or the sequence advanced,
    /// `Ok` once the serial number state is done, `Other` when the same
    /// failure was seen twice in a row.
    pub fn step(&mut self, bus: &mut Bus<'_>) -> nb::Result<(), USBError> {
        let ep0 = self
            .ctrl
            .ep0
            .ok_or(nb::Error::Other(USBError::NoFreePipe))?;

        match *self.state {
            EnumState::Start => {
                let res = bus.control.get_device_descriptor(
                    &ep0,
                    DEVICE_DESC_HEADER_LEN,
                    &mut self.device.dev_desc,
                );
                self.check(res, bus)?;
                self.ctrl.pipe_size = self.device.dev_desc.max_packet_size_0;
                self.ctrl
                    .reopen(self.id, self.device, bus)
                    .map_err(nb::Error::Other)?;
                self.advance(EnumState::FullDeviceDescriptor, bus);
            }
            EnumState::FullDeviceDescriptor => {
                let res =
                    bus.control
                        .get_device_descriptor(&ep0, DEVICE_DESC_LEN, &mut self.device.dev_desc);
                self.check(res, bus)?;
                let desc = &self.device.dev_desc;
                info!("PID: {:#x}", desc.product_id);
                info!("VID: {:#x}", desc.vendor_id);
                info!(
                    "Device class {:?}, subclass {:#x}, protocol {:#x}, {} configuration(s)",
                    desc.class(),
                    desc.subclass,
                    desc.protocol,
                    desc.num_configurations
                );
                self.advance(EnumState::SetAddress, bus);
            }
            EnumState::SetAddress => {
                let address = bus
                    .addresses
                    .acquire(&mut self.device.address)
                    .map_err(|err| {
                        error!("Address get failed!");
                        nb::Error::Other(err)
                    })?;
                let res = bus.control.set_address(&ep0, address);
                self.check(res, bus)?;
                bus.kernel.delay(bus.config.set_address_settle);
                info!("Address (#{address}) assigned.");
                self.ctrl
                    .reopen(self.id, self.device, bus)
                    .map_err(nb::Error::Other)?;
                self.advance(EnumState::ConfigDescriptorHeader, bus);
            }
            EnumState::ConfigDescriptorHeader => {
                let res = bus.control.get_configuration_descriptor(
                    &ep0,
                    CONFIGURATION_DESC_LEN,
                    &mut self.device.config_desc,
                );
                self.check(res, bus)?;
                self.advance(EnumState::ConfigDescriptorFull, bus);
            }
            EnumState::ConfigDescriptorFull => {
                let len = self.device.config_desc.total_length;
                let res = bus.control.get_configuration_descriptor(
                    &ep0,
                    len,
                    &mut self.device.config_desc,
                );
                self.check(res, bus)?;
                let cfg = &self.device.config_desc;
                info!(
                    "Configuration {}: total length {}, {} interface(s), attributes {:#x}, max power {}",
                    cfg.configuration_value,
                    cfg.total_length,
                    cfg.num_interfaces,
                    cfg.attributes,
                    cfg.max_power
                );
                for itf in cfg.interfaces() {
                    info!(
                        "  interface {} alt {}: class {:?} subclass {:#x} protocol {:#x}, {} endpoint(s)",
                        itf.interface_number,
                        itf.alternate_setting,
                        itf.class(),
                        itf.subclass,
                        itf.protocol,
                        itf.num_endpoints
                    );
                }
                self.advance(EnumState::ManufacturerString, bus);
            }
            EnumState::ManufacturerString => {
                let index = self.device.dev_desc.manufacturer_string();
                self.read_string("Manufacturer", index, &ep0, bus)?;
                self.advance(EnumState::ProductString, bus);
            }
            EnumState::ProductString => {
                let index = self.device.dev_desc.product_string();
                self.read_string("Product", index, &ep0, bus)?;
                self.advance(EnumState::SerialNumberString, bus);
            }
            EnumState::SerialNumberString => {
                let index = self.device.dev_desc.serial_number_string();
                self.read_string("Serial Number", index, &ep0, bus)?;
                return Ok(());
            }
        }
        Err(nb::Error::WouldBlock)
    }

    fn read_string(
        &mut self,
        label: &str,
        index: Option<u8>,
        ep0: &ControlPipe,
        bus: &mut Bus<'_>,
    ) -> nb::Result<(), USBError> {
        let Some(index) = index else {
            info!("{label} : N/A");
            return Ok(());
        };
        let res = bus
            .control
            .get_string_descriptor(ep0, index, &mut self.device.data[..MAX_STRING_LEN]);
        let len = self.check(res, bus)?;
        info!("{label} : {}", self.device.string(len));
        Ok(())
    }

    fn advance(&mut self, next: EnumState, bus: &mut Bus<'_>) {
        debug!("host {:?} enumeration {:?} -> {:?}", self.id, self.state, next);
        *self.state = next;
        bus.shared.post(HostEvent::StateChanged);
    }

    /// Applies the retry policy to the outcome of a control request.
    fn check<T>(&mut self, res: ControlResult<T>, bus: &mut Bus<'_>) -> nb::Result<T, USBError> {
        match res {
            Ok(v) => {
                self.ctrl.last_status = None;
                Ok(v)
            }
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(err)) => {
                if self.may_fail(bus.config.retry_policy) && self.ctrl.repeated(err) {
                    error!(
                        "host {:?}: {:?} failed twice with {err}, device not responding",
                        self.id, self.state
                    );
                    return Err(nb::Error::Other(USBError::EnumerationFailed(err)));
                }
                self.ctrl.record(err);
                warn!("host {:?}: {:?} failed with {err}, retrying", self.id, self.state);
                bus.kernel.delay(bus.config.retry_delay);
                Err(nb::Error::WouldBlock)
            }
        }
    }

    fn may_fail(&self, policy: RetryPolicy) -> bool {
        match policy {
            RetryPolicy::EveryState => true,
            RetryPolicy::FirstStateOnly => *self.state == EnumState::Start,
        }
    }
}
