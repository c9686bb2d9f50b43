//! The host tree: a root instance on the controller's own port plus one
//! child instance per device found behind a hub.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{future::poll_fn, task::Poll};

use id_arena::{Arena, Id};
use usb_if::{
    Port,
    host::{ControlOp, TransportOp},
};

use crate::{
    address::AddressPool,
    class::ClassOp,
    config::HostConfig,
    consts::MAX_CHILDREN,
    enumeration::EnumState,
    err::{Result, USBError},
    event::{EventHandler, HostEvent, Shared},
    instance::{AttachedDevice, Bus, HostInstance, HostState},
    osal::KernelOp,
    pipe::PipeRegistry,
    user::{UserCallback, UserEvent, UserHandle},
};

/// Handle of one host instance in the tree.
///
/// Arena slots of detached children are reused; the generation tells a
/// handle to the new occupant apart from a stale one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId {
    id: Id<HostInstance>,
    generation: u32,
}

impl HostId {
    pub(crate) fn new(id: Id<HostInstance>) -> Self {
        Self { id, generation: 0 }
    }

    /// Handle for the next occupant of the same slot.
    fn recycle(self) -> Self {
        Self {
            id: self.id,
            generation: self.generation.wrapping_add(1),
        }
    }

    pub fn index(&self) -> usize {
        self.id.index()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

pub struct UsbHost<T: TransportOp, C: ControlOp> {
    transport: T,
    control: C,
    kernel: &'static dyn KernelOp,
    config: HostConfig,
    addresses: AddressPool,
    pipes: PipeRegistry,
    hosts: Arena<HostInstance>,
    /// Detached children whose slot can be reused.
    vacant: Vec<HostId>,
    root: HostId,
    shared: Arc<Shared>,
    user: Option<UserCallback>,
}

impl<T: TransportOp, C: ControlOp> UsbHost<T, C> {
    /// Builds the tree with its root instance and initializes the transport.
    pub fn new(
        transport: T,
        control: C,
        kernel: &'static dyn KernelOp,
        config: HostConfig,
    ) -> Result<Self> {
        let capacity = config.max_instances.max(1);
        let mut hosts: Arena<HostInstance> = Arena::with_capacity(capacity);
        let root = hosts.alloc_with_id(|id| {
            HostInstance::new(HostId::new(id), Port::Root, None, Default::default())
        });
        let root = HostId::new(root);
        let shared = Arc::new(Shared::new(
            capacity,
            root.index(),
            config.event_queue_depth,
        ));

        let mut host = Self {
            transport,
            control,
            kernel,
            config,
            addresses: AddressPool::new(),
            pipes: PipeRegistry::new(),
            hosts,
            vacant: Vec::new(),
            root,
            shared,
            user: None,
        };
        host.with_instance(root, |h, bus| h.reset_state_machine(bus))?;
        host.transport.init()?;
        debug!("USB host initialized, up to {capacity} instances");
        Ok(host)
    }

    pub fn root(&self) -> HostId {
        self.root
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Interrupt-side handle for the transport.
    pub fn event_handler(&self) -> EventHandler {
        EventHandler::new(self.shared.clone())
    }

    /// Receives connection, configuration choice and class selection
    /// notifications of every instance in the tree.
    pub fn set_user_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut UserHandle<'_>, UserEvent) + Send + 'static,
    {
        self.user = Some(Box::new(callback));
    }

    fn with_instance<R>(
        &mut self,
        id: HostId,
        f: impl FnOnce(&mut HostInstance, &mut Bus<'_>) -> R,
    ) -> Result<R> {
        let Self {
            transport,
            control,
            kernel,
            config,
            addresses,
            pipes,
            hosts,
            shared,
            user,
            ..
        } = self;
        let host = hosts
            .get_mut(id.id)
            .filter(|h| h.live && h.id == id)
            .ok_or(USBError::InvalidHost)?;
        let mut bus = Bus {
            transport,
            control,
            pipes,
            addresses,
            kernel: *kernel,
            config,
            shared,
            user,
        };
        Ok(f(host, &mut bus))
    }

    fn instance(&self, id: HostId) -> Option<&HostInstance> {
        self.hosts.get(id.id).filter(|h| h.live && h.id == id)
    }

    fn instance_mut(&mut self, id: HostId) -> Option<&mut HostInstance> {
        self.hosts.get_mut(id.id).filter(|h| h.live && h.id == id)
    }

    /// Resets the instance; on the root this also stops the transport.
    pub fn deinit(&mut self, id: HostId) -> Result<()> {
        self.with_instance(id, |h, bus| h.deinit(bus))
    }

    pub fn register_class(&mut self, id: HostId, driver: Arc<dyn ClassOp>) -> Result<()> {
        let host = self.instance_mut(id).ok_or(USBError::InvalidHost)?;
        host.classes.register(driver)
    }

    /// Starts the transport and powers the port. No-op on a child.
    pub fn start(&mut self, id: HostId) -> Result<()> {
        self.with_instance(id, |h, bus| h.start(bus))
    }

    /// Stops the transport, removes port power and frees the control pipes.
    /// No-op on a child.
    pub fn stop(&mut self, id: HostId) -> Result<()> {
        self.with_instance(id, |h, bus| h.stop(bus))
    }

    /// Power-cycles the port and restarts enumeration from scratch. No-op on
    /// a child.
    pub fn re_enumerate(&mut self, id: HostId) -> Result<()> {
        self.with_instance(id, |h, bus| h.re_enumerate(bus))
    }

    /// Runs one pass of the instance's state machine.
    ///
    /// For a child the enumeration progress is returned: `WouldBlock` while
    /// in progress, `Other` once it failed. The root always returns `Ok`.
    pub fn process(&mut self, id: HostId) -> nb::Result<(), USBError> {
        self.with_instance(id, |h, bus| h.process(bus))
            .map_err(nb::Error::Other)?
    }

    /// Processes every instance, root first, then each child depth first.
    pub fn poll_tree(&mut self) {
        if let Err(nb::Error::Other(err)) = self.process(self.root) {
            warn!("root host: {err}");
        }
        self.poll_children(self.root);
    }

    fn poll_children(&mut self, parent: HostId) {
        let Some(children) = self.instance(parent).map(|h| h.children) else {
            return;
        };
        for child in children.into_iter().flatten() {
            if let Err(nb::Error::Other(err)) = self.process(child) {
                debug!("host {child:?}: {err}");
            }
            self.poll_children(child);
        }
    }

    /// Waits for the next interrupt-side notification.
    pub async fn wait_event(&self) -> HostEvent {
        poll_fn(|cx| {
            if let Some(event) = self.shared.pop() {
                return Poll::Ready(event);
            }
            self.shared.register(cx.waker());
            match self.shared.pop() {
                Some(event) => Poll::Ready(event),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Waits for one event, then processes the whole tree once.
    pub async fn run_once(&mut self) -> HostEvent {
        let event = self.wait_event().await;
        trace!("event {event:?}");
        self.poll_tree();
        event
    }

    /// Host task body.
    pub async fn run(&mut self) {
        loop {
            self.run_once().await;
        }
    }

    pub fn select_interface(&mut self, id: HostId, index: u8) -> Result<()> {
        let host = self.instance_mut(id).ok_or(USBError::InvalidHost)?;
        host.device.select_interface(index)
    }

    /// Class code of interface 0 of the active configuration.
    pub fn active_class(&self, id: HostId) -> Result<u8> {
        let host = self.instance(id).ok_or(USBError::InvalidHost)?;
        Ok(host.device.config_desc.interfaces[0].class)
    }

    pub fn find_interface(
        &self,
        id: HostId,
        class: Option<u8>,
        subclass: Option<u8>,
        protocol: Option<u8>,
    ) -> Option<u8> {
        self.instance(id)?
            .device
            .config_desc
            .find_interface(class, subclass, protocol)
    }

    pub fn find_interface_index(
        &self,
        id: HostId,
        interface_number: u8,
        alt_setting: u8,
    ) -> Option<u8> {
        self.instance(id)?
            .device
            .config_desc
            .find_interface_index(interface_number, alt_setting)
    }

    /// Adds a child instance for downstream port `port` of the hub served by
    /// `parent`.
    ///
    /// The child starts in `Idle` with a copy of the parent's class
    /// registry and is reported through the same event handler.
    pub fn attach_child(&mut self, parent: HostId, port: u8) -> Result<HostId> {
        let slot = port as usize;
        if slot >= MAX_CHILDREN {
            return Err(USBError::ChildLimitReached);
        }
        let up = self.instance(parent).ok_or(USBError::InvalidHost)?;
        if up.children[slot].is_some() {
            return Err(USBError::PortOccupied);
        }
        let classes = up.classes.clone();
        let downstream = Port::Downstream {
            hub: parent.index(),
            port,
        };

        let id = if let Some(old) = self.vacant.pop() {
            let id = old.recycle();
            let node = self.hosts.get_mut(id.id).ok_or(USBError::InvalidHost)?;
            *node = HostInstance::new(id, downstream, Some(parent), classes);
            id
        } else if self.hosts.len() < self.config.max_instances.max(1) {
            HostId::new(self.hosts.alloc_with_id(|id| {
                HostInstance::new(HostId::new(id), downstream, Some(parent), classes)
            }))
        } else {
            return Err(USBError::InstanceLimitReached);
        };

        self.shared.reset_node(id);
        if let Some(up) = self.instance_mut(parent) {
            up.children[slot] = Some(id);
        }
        self.shared.link_child(parent.index(), slot, id.index());
        info!("host {id:?} attached to port {port} of {parent:?}");
        Ok(id)
    }

    /// Removes a child and everything below it, giving back their addresses
    /// and pipes.
    pub fn detach_child(&mut self, id: HostId) -> Result<()> {
        let host = self.instance(id).ok_or(USBError::InvalidHost)?;
        let (parent, port, children) = match (host.parent, host.port) {
            (Some(parent), Port::Downstream { port, .. }) => (parent, port, host.children),
            _ => return Err(USBError::InvalidHost),
        };
        let slot = port as usize;

        for child in children.into_iter().flatten() {
            self.detach_child(child)?;
        }

        self.shared.unlink_child(parent.index(), slot);
        if let Some(up) = self.instance_mut(parent) {
            up.children[slot] = None;
        }
        self.with_instance(id, |h, bus| h.release(bus))?;
        self.vacant.push(id);
        info!("host {id:?} detached");
        Ok(())
    }

    pub fn parent(&self, id: HostId) -> Option<HostId> {
        self.instance(id)?.parent
    }

    pub fn children(&self, id: HostId) -> Vec<HostId> {
        self.instance(id)
            .map(|h| h.children.iter().flatten().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_child(&self, id: HostId) -> Option<bool> {
        self.instance(id).map(HostInstance::is_child)
    }

    pub fn state(&self, id: HostId) -> Option<HostState> {
        self.instance(id).map(|h| h.state)
    }

    pub fn enum_state(&self, id: HostId) -> Option<EnumState> {
        self.instance(id).map(|h| h.enum_state)
    }

    pub fn device(&self, id: HostId) -> Option<&AttachedDevice> {
        self.instance(id).map(|h| &h.device)
    }

    pub fn is_port_enabled(&self, id: HostId) -> Option<bool> {
        self.instance(id).map(|h| h.device.port_enabled)
    }

    /// Frame ticks counted for the instance.
    pub fn timer(&self, id: HostId) -> Option<u32> {
        self.instance(id).map(|_| self.shared.timer(id.index()))
    }

    pub fn active_driver(&self, id: HostId) -> Option<Arc<dyn ClassOp>> {
        self.instance(id)?.active.clone()
    }

    /// Why the instance last gave up, cleared by a successful enumeration.
    pub fn last_error(&self, id: HostId) -> Option<USBError> {
        self.instance(id)?.failure.clone()
    }

    /// Control request failures seen since the last reset.
    pub fn control_errors(&self, id: HostId) -> Option<u32> {
        self.instance(id).map(|h| h.ctrl.error_count)
    }

    pub fn addresses_in_use(&self) -> usize {
        self.addresses.in_use()
    }

    pub fn pipes_in_use(&self) -> usize {
        self.pipes.in_use()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }
}
