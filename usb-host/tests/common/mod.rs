#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use usbh_core::*;

pub fn init_log() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Init,
    Start,
    Stop,
    Vbus(bool),
    Reset(Port),
    Open(PipeId, PipeConfig),
    Close(PipeId),
}

#[derive(Default)]
pub struct MockTransport {
    pub calls: Vec<Call>,
    pub speed: Speed,
}

impl MockTransport {
    pub fn resets(&self) -> Vec<Port> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Reset(port) => Some(*port),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<PipeConfig> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Open(_, cfg) => Some(*cfg),
                _ => None,
            })
            .collect()
    }
}

impl TransportOp for MockTransport {
    fn init(&mut self) -> std::result::Result<(), TransferError> {
        self.calls.push(Call::Init);
        Ok(())
    }

    fn start(&mut self) {
        self.calls.push(Call::Start);
    }

    fn stop(&mut self) {
        self.calls.push(Call::Stop);
    }

    fn drive_vbus(&mut self, on: bool) {
        self.calls.push(Call::Vbus(on));
    }

    fn reset_port(&mut self, port: Port) {
        self.calls.push(Call::Reset(port));
    }

    fn speed(&mut self, _port: Port) -> Speed {
        self.speed
    }

    fn open_pipe(
        &mut self,
        pipe: PipeId,
        config: &PipeConfig,
    ) -> std::result::Result<(), TransferError> {
        self.calls.push(Call::Open(pipe, *config));
        Ok(())
    }

    fn close_pipe(&mut self, pipe: PipeId) {
        self.calls.push(Call::Close(pipe));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    DeviceDescriptor(u8),
    ConfigDescriptor(u16),
    String(u8),
    SetAddress(u8),
    SetConfiguration(u8),
}

/// Control engine answering for one kind of device.
///
/// Each request first consumes the next scripted outcome, if any; an empty
/// script means the request succeeds.
pub struct MockControl {
    pub device: DeviceDescriptor,
    pub config: ConfigurationDescriptor,
    pub strings: Vec<(u8, &'static str)>,
    pub log: Vec<(Request, ControlPipe)>,
    pub script: VecDeque<ControlResult>,
}

impl MockControl {
    pub fn requests(&self) -> Vec<Request> {
        self.log.iter().map(|(r, _)| *r).collect()
    }

    fn next(&mut self, request: Request, ep0: &ControlPipe) -> ControlResult {
        self.log.push((request, *ep0));
        self.script.pop_front().unwrap_or(Ok(()))
    }
}

impl ControlOp for MockControl {
    fn get_device_descriptor(
        &mut self,
        ep0: &ControlPipe,
        len: u8,
        desc: &mut DeviceDescriptor,
    ) -> ControlResult {
        self.next(Request::DeviceDescriptor(len), ep0)?;
        *desc = self.device.clone();
        Ok(())
    }

    fn get_configuration_descriptor(
        &mut self,
        ep0: &ControlPipe,
        len: u16,
        desc: &mut ConfigurationDescriptor,
    ) -> ControlResult {
        self.next(Request::ConfigDescriptor(len), ep0)?;
        *desc = self.config.clone();
        Ok(())
    }

    fn get_string_descriptor(
        &mut self,
        ep0: &ControlPipe,
        index: u8,
        buff: &mut [u8],
    ) -> ControlResult<usize> {
        self.next(Request::String(index), ep0)?;
        let text = self
            .strings
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, s)| *s)
            .unwrap_or("");
        let n = text.len().min(buff.len());
        buff[..n].copy_from_slice(&text.as_bytes()[..n]);
        Ok(n)
    }

    fn set_address(&mut self, ep0: &ControlPipe, address: u8) -> ControlResult {
        self.next(Request::SetAddress(address), ep0)
    }

    fn set_configuration(&mut self, ep0: &ControlPipe, value: u8) -> ControlResult {
        self.next(Request::SetConfiguration(value), ep0)
    }
}

/// Vendor-class device with one interrupt IN endpoint.
pub fn vendor_device() -> MockControl {
    let device = DeviceDescriptor {
        usb_version: 0x0200,
        max_packet_size_0: 8,
        vendor_id: 0x1234,
        product_id: 0x5678,
        manufacturer_string_index: 1,
        product_string_index: 2,
        serial_number_string_index: 0,
        num_configurations: 1,
        ..Default::default()
    };
    let mut config = ConfigurationDescriptor {
        total_length: 25,
        num_interfaces: 1,
        configuration_value: 1,
        ..Default::default()
    };
    config.interfaces[0].class = 0xFF;
    config.interfaces[0].num_endpoints = 1;
    config.interfaces[0].endpoints[0] = EndpointDescriptor {
        address: 0x81,
        attributes: 0x03,
        max_packet_size: 8,
        interval: 10,
    };
    MockControl {
        device,
        config,
        strings: vec![(1, "Acme"), (2, "Widget")],
        log: Vec::new(),
        script: VecDeque::new(),
    }
}

pub struct NoDelay;

impl KernelOp for NoDelay {
    fn delay(&self, _duration: Duration) {}
}

pub static KERNEL: NoDelay = NoDelay;

pub fn stall() -> nb::Error<ControlError> {
    nb::Error::Other(ControlError::new(ControlStage::Data, TransferError::Stall))
}

pub fn timeout() -> nb::Error<ControlError> {
    nb::Error::Other(ControlError::new(ControlStage::Data, TransferError::Timeout))
}

/// Class driver that records what the core asks of it.
///
/// On init it claims an interrupt pipe for the first endpoint of the
/// selected interface and gives it back on deinit.
pub struct Recorder {
    pub name: &'static str,
    pub code: u8,
    pub fail_init: bool,
    pub request_error: Option<USBError>,
    pub inits: AtomicU32,
    pub deinits: AtomicU32,
    pub backgrounds: AtomicU32,
    pub pipes: Mutex<HashMap<usize, PipeId>>,
    pub ticks: Mutex<Vec<(usize, u32)>>,
}

impl Recorder {
    pub fn new(name: &'static str, code: u8) -> Self {
        Self {
            name,
            code,
            fail_init: false,
            request_error: None,
            inits: AtomicU32::new(0),
            deinits: AtomicU32::new(0),
            backgrounds: AtomicU32::new(0),
            pipes: Mutex::new(HashMap::new()),
            ticks: Mutex::new(Vec::new()),
        }
    }

    pub fn tick_hosts(&self) -> Vec<usize> {
        self.ticks.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }
}

impl ClassOp for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn class_code(&self) -> BaseClass {
        BaseClass::from(self.code)
    }

    fn init(&self, host: &mut ClassHost<'_>) -> usbh_core::Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(USBError::ClassInitFailed);
        }
        let itf = host.device().current_interface as usize;
        let ep = host.device().config_desc.interfaces[itf].endpoints()[0];
        let pipe = host.alloc_pipe(ep.address)?;
        host.open_pipe(pipe, ep.address, ep.transfer_type(), ep.max_packet_size)?;
        self.pipes.lock().unwrap().insert(host.id().index(), pipe);
        Ok(())
    }

    fn deinit(&self, host: &mut ClassHost<'_>) {
        self.deinits.fetch_add(1, Ordering::SeqCst);
        if let Some(pipe) = self.pipes.lock().unwrap().remove(&host.id().index()) {
            let _ = host.free_pipe(pipe);
        }
    }

    fn requests(&self, _host: &mut ClassHost<'_>) -> nb::Result<(), USBError> {
        match &self.request_error {
            Some(err) => Err(nb::Error::Other(err.clone())),
            None => Ok(()),
        }
    }

    fn background(&self, _host: &mut ClassHost<'_>) {
        self.backgrounds.fetch_add(1, Ordering::SeqCst);
    }

    fn frame_tick(&self, frame: &FrameContext) {
        self.ticks
            .lock()
            .unwrap()
            .push((frame.host.index(), frame.timer));
    }
}

pub type TestHost = UsbHost<MockTransport, MockControl>;

pub struct Bench {
    pub host: TestHost,
    pub events: EventHandler,
    pub user: Arc<Mutex<Vec<(HostId, UserEvent)>>>,
}

impl Bench {
    pub fn new() -> Self {
        Self::with(HostConfig::default(), vendor_device())
    }

    pub fn with(config: HostConfig, control: MockControl) -> Self {
        init_log();
        let mut host = UsbHost::new(MockTransport::default(), control, &KERNEL, config).unwrap();
        let events = host.event_handler();
        let user = Arc::new(Mutex::new(Vec::new()));
        let log = user.clone();
        host.set_user_callback(move |handle: &mut UserHandle<'_>, event| {
            log.lock().unwrap().push((handle.id(), event));
        });
        Self { host, events, user }
    }

    pub fn root(&self) -> HostId {
        self.host.root()
    }

    /// Connects a device behind `id` and brings the port up, leaving the
    /// instance at the start of enumeration.
    pub fn plug(&mut self, id: HostId) {
        self.events.connect(id);
        self.host.poll_tree();
        assert_eq!(self.host.state(id), Some(HostState::WaitForAttachment));
        self.events.port_enabled(id);
        self.host.poll_tree();
        assert_eq!(self.host.state(id), Some(HostState::Enumerating));
    }

    /// Polls the tree until `id` reaches `state`.
    pub fn run_until(&mut self, id: HostId, state: HostState) -> bool {
        for _ in 0..64 {
            if self.host.state(id) == Some(state) {
                return true;
            }
            self.host.poll_tree();
        }
        self.host.state(id) == Some(state)
    }

    pub fn user_events(&self, id: HostId) -> Vec<UserEvent> {
        self.user
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == id)
            .map(|(_, e)| *e)
            .collect()
    }
}
