//! One host instance: the device behind one port and the state machine
//! that brings it from attachment to an active class driver.

use alloc::sync::Arc;

use usb_if::{
    EndpointType, Port, Speed,
    descriptor::{ConfigurationDescriptor, DeviceDescriptor},
    err::ControlError,
    host::{ControlOp, ControlPipe, PipeConfig, TransportOp},
};

use crate::{
    address::AddressPool,
    class::{ClassHost, ClassOp, ClassRegistry},
    config::HostConfig,
    consts::{EP0_IN, EP0_OUT, MAX_CHILDREN, MAX_DATA_BUFFER, MPS_DEFAULT},
    enumeration::{EnumState, Enumerator},
    err::{Result, USBError},
    event::{HostEvent, PortSignal, Shared},
    host::HostId,
    osal::KernelOp,
    pipe::PipeRegistry,
    user::{UserCallback, UserEvent, UserHandle},
};

/// Top-level state of one host instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    #[default]
    Idle,
    /// Port reset issued, waiting for the port to come up.
    WaitForAttachment,
    Attached,
    Enumerating,
    /// Several configurations, the application gets to pick one.
    AwaitConfigurationChoice,
    SetConfiguration,
    SelectClass,
    ClassRequest,
    ClassActive,
    Disconnected,
    /// Terminal until the next connect.
    Aborted,
}

/// What the core knows about the device on an instance's port.
#[derive(Debug, Clone)]
pub struct AttachedDevice {
    /// 0 until SET_ADDRESS.
    pub address: u8,
    pub speed: Speed,
    pub is_connected: bool,
    pub port_enabled: bool,
    pub dev_desc: DeviceDescriptor,
    pub config_desc: ConfigurationDescriptor,
    pub current_interface: u8,
    pub(crate) data: [u8; MAX_DATA_BUFFER],
}

impl Default for AttachedDevice {
    fn default() -> Self {
        Self {
            address: 0,
            speed: Speed::Full,
            is_connected: false,
            port_enabled: false,
            dev_desc: DeviceDescriptor::default(),
            config_desc: ConfigurationDescriptor::default(),
            current_interface: 0,
            data: [0; MAX_DATA_BUFFER],
        }
    }
}

impl AttachedDevice {
    pub fn select_interface(&mut self, index: u8) -> Result<()> {
        let Some(itf) = self.config_desc.interfaces().get(index as usize) else {
            error!("Cannot select interface {index}");
            return Err(USBError::InvalidInterface(index));
        };
        info!("Switching to Interface (#{index})");
        info!("Class    : {:#x} ({:?})", itf.class, itf.class());
        info!("SubClass : {:#x}", itf.subclass);
        info!("Protocol : {:#x}", itf.protocol);
        self.current_interface = index;
        Ok(())
    }

    /// Text of the last string descriptor read during enumeration.
    pub(crate) fn string(&self, len: usize) -> &str {
        let len = len.min(self.data.len());
        core::str::from_utf8(&self.data[..len]).unwrap_or("<invalid>")
    }
}

/// Control-transfer bookkeeping of one instance.
#[derive(Debug, Clone)]
pub(crate) struct ControlBook {
    pub ep0: Option<ControlPipe>,
    /// Endpoint 0 packet size the control pipes are opened with.
    pub pipe_size: u8,
    /// Failure of the previous attempt, cleared on success.
    pub last_status: Option<ControlError>,
    pub error_count: u32,
}

impl Default for ControlBook {
    fn default() -> Self {
        Self {
            ep0: None,
            pipe_size: MPS_DEFAULT,
            last_status: None,
            error_count: 0,
        }
    }
}

impl ControlBook {
    /// Reopens both control pipes with the device's current address, speed
    /// and packet size.
    pub fn reopen(
        &mut self,
        owner: HostId,
        device: &AttachedDevice,
        bus: &mut Bus<'_>,
    ) -> Result<()> {
        let ep0 = self.ep0.as_mut().ok_or(USBError::NoFreePipe)?;
        ep0.device_address = device.address;
        ep0.speed = device.speed;
        ep0.max_packet_size = self.pipe_size;
        let ep0 = *ep0;

        for (pipe, endpoint) in [(ep0.pipe_in, EP0_IN), (ep0.pipe_out, EP0_OUT)] {
            let config = PipeConfig {
                endpoint,
                device_address: ep0.device_address,
                speed: ep0.speed,
                kind: EndpointType::Control,
                max_packet_size: ep0.max_packet_size as u16,
            };
            bus.pipes.open(bus.transport, owner.index(), pipe, &config)?;
        }
        Ok(())
    }

    /// True if `err` repeats the recorded failure, which is forgotten then.
    pub fn repeated(&mut self, err: ControlError) -> bool {
        if self.last_status == Some(err) {
            self.last_status = None;
            self.error_count += 1;
            true
        } else {
            false
        }
    }

    pub fn record(&mut self, err: ControlError) {
        self.last_status = Some(err);
        self.error_count += 1;
    }
}

/// Everything an instance borrows from the tree while it runs.
pub(crate) struct Bus<'a> {
    pub transport: &'a mut dyn TransportOp,
    pub control: &'a mut dyn ControlOp,
    pub pipes: &'a mut PipeRegistry,
    pub addresses: &'a mut AddressPool,
    pub kernel: &'static dyn KernelOp,
    pub config: &'a HostConfig,
    pub shared: &'a Shared,
    pub user: &'a mut Option<UserCallback>,
}

impl Bus<'_> {
    pub fn class_host<'b>(
        &'b mut self,
        id: HostId,
        is_child: bool,
        device: &'b mut AttachedDevice,
    ) -> ClassHost<'b> {
        ClassHost {
            id,
            is_child,
            timer: self.shared.timer(id.index()),
            device,
            pipes: &mut *self.pipes,
            transport: &mut *self.transport,
        }
    }
}

pub struct HostInstance {
    pub(crate) id: HostId,
    pub(crate) live: bool,
    pub(crate) port: Port,
    pub(crate) parent: Option<HostId>,
    pub(crate) children: [Option<HostId>; MAX_CHILDREN],
    pub(crate) state: HostState,
    pub(crate) enum_state: EnumState,
    pub(crate) ctrl: ControlBook,
    pub(crate) device: AttachedDevice,
    pub(crate) classes: ClassRegistry,
    pub(crate) active: Option<Arc<dyn ClassOp>>,
    /// Configuration picked by the application, if any.
    pub(crate) configuration: Option<u8>,
    /// Why the instance last gave up.
    pub(crate) failure: Option<USBError>,
}

impl HostInstance {
    pub(crate) fn new(
        id: HostId,
        port: Port,
        parent: Option<HostId>,
        classes: ClassRegistry,
    ) -> Self {
        Self {
            id,
            live: true,
            port,
            parent,
            children: [None; MAX_CHILDREN],
            state: HostState::Idle,
            enum_state: EnumState::Start,
            ctrl: ControlBook::default(),
            device: AttachedDevice::default(),
            classes,
            active: None,
            configuration: None,
            failure: None,
        }
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// One pass of the state machine.
    ///
    /// A child reports its enumeration progress so the hub driver above it
    /// can decide what to do with a failing device; the root handles that
    /// itself and always reports `Ok`.
    pub(crate) fn process(&mut self, bus: &mut Bus<'_>) -> nb::Result<(), USBError> {
        self.apply_signals(bus);

        let mut status = Ok(());
        match self.state {
            HostState::Idle => {
                if self.device.is_connected {
                    self.set_state(HostState::WaitForAttachment, bus);
                    bus.kernel.delay(bus.config.connect_settle);
                    bus.transport.reset_port(self.port);
                    bus.shared.post(HostEvent::Port);
                }
            }
            HostState::WaitForAttachment => {}
            HostState::Attached => self.attach(bus),
            HostState::Enumerating => status = self.enumerate(bus),
            HostState::AwaitConfigurationChoice => {
                self.notify(UserEvent::SelectConfiguration, bus);
                self.set_state(HostState::SetConfiguration, bus);
            }
            HostState::SetConfiguration => self.set_configuration(bus),
            HostState::SelectClass => self.select_class(bus),
            HostState::ClassRequest => self.class_request(bus),
            HostState::ClassActive => {
                if let Some(driver) = &self.active {
                    let mut host = bus.class_host(self.id, self.parent.is_some(), &mut self.device);
                    driver.background(&mut host);
                }
            }
            HostState::Disconnected => {
                self.teardown_class(bus);
                self.reset_state_machine(bus);
            }
            HostState::Aborted => {}
        }

        if self.is_child() { status } else { Ok(()) }
    }

    fn apply_signals(&mut self, bus: &mut Bus<'_>) {
        let signals = bus.shared.take_signals(self.id.index());
        if signals.contains(PortSignal::PORT_DISABLED) {
            self.device.port_enabled = false;
            info!("host {:?}: port disabled", self.id);
        }
        if signals.contains(PortSignal::DISCONNECT) {
            self.on_disconnect(bus);
        }
        if signals.contains(PortSignal::CONNECT) {
            self.on_connect(bus);
        }
        if signals.contains(PortSignal::PORT_ENABLED) {
            self.device.port_enabled = true;
            info!("host {:?}: port enabled", self.id);
            if self.state == HostState::WaitForAttachment {
                info!("USB Device reset success");
                self.set_state(HostState::Attached, bus);
            }
        }
    }

    fn on_connect(&mut self, bus: &mut Bus<'_>) {
        if self.state == HostState::Aborted {
            info!("host {:?}: restarting after abort", self.id);
            self.enum_state = EnumState::Start;
            self.ctrl.last_status = None;
            self.configuration = None;
            self.set_state(HostState::Idle, bus);
        }
        match self.state {
            HostState::Idle => {
                self.device.is_connected = true;
                self.notify(UserEvent::Connection, bus);
                info!("USB Device connected");
            }
            HostState::WaitForAttachment => {
                info!("USB Device reset success");
                self.set_state(HostState::Attached, bus);
            }
            HostState::Disconnected => self.device.is_connected = true,
            _ => {}
        }
    }

    fn on_disconnect(&mut self, bus: &mut Bus<'_>) {
        self.device.is_connected = false;
        self.notify(UserEvent::Disconnection, bus);
        info!("USB Device disconnected");
        bus.kernel.delay(bus.config.disconnect_settle);

        if !self.is_child() {
            bus.transport.stop();
        }
        self.free_control(bus);
        if !self.is_child() {
            bus.transport.start();
        }

        self.set_state(HostState::Disconnected, bus);
        bus.shared.post(HostEvent::Port);
    }

    fn attach(&mut self, bus: &mut Bus<'_>) {
        info!("USB device attached");
        bus.kernel.delay(bus.config.reset_settle);
        self.device.speed = bus.transport.speed(self.port);
        info!("USB speed: {:?}", self.device.speed);

        self.set_state(HostState::Enumerating, bus);
        if let Err(err) = self.open_control(bus) {
            error!("host {:?}: control pipes unavailable: {err}", self.id);
            self.failure = Some(err);
            self.set_state(HostState::Aborted, bus);
        }
        bus.shared.post(HostEvent::Port);
    }

    fn open_control(&mut self, bus: &mut Bus<'_>) -> Result<()> {
        self.free_control(bus);
        let owner = self.id.index();
        let pipe_out = bus.pipes.alloc(owner, EP0_OUT)?;
        let pipe_in = match bus.pipes.alloc(owner, EP0_IN) {
            Ok(pipe) => pipe,
            Err(err) => {
                let _ = bus.pipes.free(bus.transport, owner, pipe_out);
                return Err(err);
            }
        };
        self.ctrl.ep0 = Some(ControlPipe {
            pipe_in,
            pipe_out,
            device_address: self.device.address,
            speed: self.device.speed,
            max_packet_size: self.ctrl.pipe_size,
        });
        self.ctrl.reopen(self.id, &self.device, bus)
    }

    fn free_control(&mut self, bus: &mut Bus<'_>) {
        if let Some(ep0) = self.ctrl.ep0.take() {
            for pipe in [ep0.pipe_out, ep0.pipe_in] {
                if let Err(err) = bus.pipes.free(bus.transport, self.id.index(), pipe) {
                    warn!("host {:?}: {err}", self.id);
                }
            }
        }
    }

    fn enumerate(&mut self, bus: &mut Bus<'_>) -> nb::Result<(), USBError> {
        let res = Enumerator {
            id: self.id,
            state: &mut self.enum_state,
            ctrl: &mut self.ctrl,
            device: &mut self.device,
        }
        .step(bus);

        match &res {
            Ok(()) => {
                info!("Enumeration done.");
                self.failure = None;
                self.device.current_interface = 0;
                if self.device.dev_desc.num_configurations == 1 {
                    info!("This device has only 1 configuration.");
                    self.set_state(HostState::SetConfiguration, bus);
                } else {
                    self.set_state(HostState::AwaitConfigurationChoice, bus);
                }
            }
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(err)) => {
                self.failure = Some(err.clone());
                if self.is_child() {
                    warn!("host {:?}: enumeration failed: {err}", self.id);
                } else {
                    error!("Device not responding, please unplug the device.");
                    self.re_enumerate(bus);
                }
            }
        }
        res
    }

    fn set_configuration(&mut self, bus: &mut Bus<'_>) {
        let Some(ep0) = self.ctrl.ep0 else {
            self.failure = Some(USBError::NoFreePipe);
            self.set_state(HostState::Aborted, bus);
            return;
        };
        let value = self
            .configuration
            .unwrap_or(self.device.config_desc.configuration_value);

        match bus.control.set_configuration(&ep0, value) {
            Ok(()) => {
                self.ctrl.last_status = None;
                info!("Configuration {value} set.");
                self.set_state(HostState::SelectClass, bus);
            }
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(err)) => {
                if self.ctrl.repeated(err) {
                    error!("host {:?}: SET_CONFIGURATION failed twice with {err}", self.id);
                    self.failure = Some(USBError::ConfigurationFailed(err));
                    self.set_state(HostState::Aborted, bus);
                } else {
                    self.ctrl.record(err);
                    warn!("host {:?}: SET_CONFIGURATION failed with {err}, retrying", self.id);
                    bus.kernel.delay(bus.config.retry_delay);
                }
            }
        }
    }

    fn select_class(&mut self, bus: &mut Bus<'_>) {
        if self.classes.is_empty() {
            debug!("host {:?}: no class has been registered", self.id);
            return;
        }
        self.active = None;

        let Some(driver) = self.classes.select_for_device(&self.device.config_desc) else {
            warn!(
                "No registered class for this device (class {:#x}).",
                self.device.config_desc.interfaces[0].class
            );
            self.failure = Some(USBError::NoClassFound);
            self.set_state(HostState::Aborted, bus);
            return;
        };

        let mut host = bus.class_host(self.id, self.is_child(), &mut self.device);
        match driver.init(&mut host) {
            Ok(()) => {
                info!("{} class started.", driver.name());
                self.active = Some(driver);
                self.set_state(HostState::ClassRequest, bus);
                self.notify(UserEvent::ClassSelected, bus);
            }
            Err(err) => {
                warn!("Device not supporting {} class: {err}", driver.name());
                self.failure = Some(USBError::ClassInitFailed);
                self.set_state(HostState::Aborted, bus);
            }
        }
    }

    fn class_request(&mut self, bus: &mut Bus<'_>) {
        let Some(driver) = self.active.clone() else {
            error!("Invalid Class Driver.");
            self.set_state(HostState::Aborted, bus);
            return;
        };

        let mut host = bus.class_host(self.id, self.is_child(), &mut self.device);
        match driver.requests(&mut host) {
            Ok(()) => self.set_state(HostState::ClassActive, bus),
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(err)) => {
                error!("{} class request failed: {err}", driver.name());
                self.teardown_class(bus);
                self.failure = Some(err);
                self.set_state(HostState::Aborted, bus);
            }
        }
    }

    /// Deinitializes the active class driver, if any.
    fn teardown_class(&mut self, bus: &mut Bus<'_>) {
        if let Some(driver) = self.active.take() {
            bus.shared.publish(self.id, None);
            let mut host = bus.class_host(self.id, self.is_child(), &mut self.device);
            driver.deinit(&mut host);
            info!("{} class stopped.", driver.name());
        }
    }

    fn notify(&mut self, event: UserEvent, bus: &mut Bus<'_>) {
        if let Some(callback) = bus.user.as_mut() {
            let mut handle = UserHandle {
                id: self.id,
                device: &mut self.device,
                configuration: &mut self.configuration,
            };
            callback(&mut handle, event);
        }
    }

    pub(crate) fn set_state(&mut self, state: HostState, bus: &mut Bus<'_>) {
        if self.state == state {
            return;
        }
        debug!("host {:?}: {:?} -> {:?}", self.id, self.state, state);
        if self.state == HostState::ClassActive {
            bus.shared.publish(self.id, None);
        }
        if state == HostState::ClassActive {
            bus.shared.publish(self.id, self.active.clone());
        }
        self.state = state;
        bus.shared.post(HostEvent::StateChanged);
    }

    /// Back to `Idle` with nothing allocated. A child never resets itself.
    pub(crate) fn reset_state_machine(&mut self, bus: &mut Bus<'_>) {
        if self.is_child() {
            return;
        }
        self.teardown_class(bus);
        bus.pipes.clear_owned(self.id.index());
        self.ctrl = ControlBook::default();
        self.device.data.fill(0);
        self.enum_state = EnumState::Start;
        self.configuration = None;
        bus.addresses.release(&mut self.device.address);
        self.device.speed = Speed::Full;
        self.set_state(HostState::Idle, bus);
    }

    pub(crate) fn start(&mut self, bus: &mut Bus<'_>) {
        if self.is_child() {
            return;
        }
        bus.transport.start();
        bus.transport.drive_vbus(true);
    }

    pub(crate) fn stop(&mut self, bus: &mut Bus<'_>) {
        if self.is_child() {
            return;
        }
        bus.transport.stop();
        bus.transport.drive_vbus(false);
        self.free_control(bus);
    }

    pub(crate) fn re_enumerate(&mut self, bus: &mut Bus<'_>) {
        if self.is_child() {
            return;
        }
        info!("host {:?}: re-enumerating", self.id);
        self.stop(bus);
        bus.kernel.delay(bus.config.re_enumerate_settle);
        self.reset_state_machine(bus);
        self.start(bus);
        bus.shared.post(HostEvent::Port);
    }

    pub(crate) fn deinit(&mut self, bus: &mut Bus<'_>) {
        self.reset_state_machine(bus);
        if !self.is_child() {
            bus.transport.stop();
        }
    }

    /// Gives back everything a detached child held.
    pub(crate) fn release(&mut self, bus: &mut Bus<'_>) {
        self.teardown_class(bus);
        self.free_control(bus);
        bus.pipes.free_owned(bus.transport, self.id.index());
        bus.addresses.release(&mut self.device.address);
        bus.shared.publish(self.id, None);
        self.live = false;
    }
}
