//! State shared between interrupt context and the task level.
//!
//! Interrupt context only touches what lives here: per-instance signal flags
//! and tick counters, the published class driver used for frame ticks, the
//! child links the frame tick walks, and the bounded event queue that wakes
//! the task loop. Everything else in a host instance is task-only.
//!
//! Writer per field:
//! - `generation`: task (interrupt reads)
//! - `timer`: interrupt (task reads)
//! - `signals`: interrupt sets, task clears
//! - `active`, `children`: task (interrupt reads, `active` via `try_lock`)

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

use bitflags::bitflags;
use crossbeam::queue::ArrayQueue;
use futures::task::AtomicWaker;

use crate::{
    class::{ClassOp, FrameContext},
    consts::MAX_CHILDREN,
    host::HostId,
};

bitflags! {
    /// Port notifications waiting for the task level.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortSignal: u8 {
        const CONNECT = 1 << 0;
        const DISCONNECT = 1 << 1;
        const PORT_ENABLED = 1 << 2;
        const PORT_DISABLED = 1 << 3;
    }
}

/// Reasons to wake the task loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Connect, disconnect or port enable change.
    Port,
    /// A state transition that should be evaluated right away.
    StateChanged,
    /// An URB finished on some pipe.
    TransferComplete,
}

const NO_CHILD: usize = usize::MAX;

type Published = Option<(HostId, Arc<dyn ClassOp>)>;

struct Node {
    /// Generation of the instance occupying the slot.
    generation: AtomicU32,
    timer: AtomicU32,
    signals: AtomicU8,
    active: spin::Mutex<Published>,
    children: [AtomicUsize; MAX_CHILDREN],
}

impl Node {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            timer: AtomicU32::new(0),
            signals: AtomicU8::new(0),
            active: spin::Mutex::new(None),
            children: core::array::from_fn(|_| AtomicUsize::new(NO_CHILD)),
        }
    }
}

pub(crate) struct Shared {
    nodes: Box<[Node]>,
    root: usize,
    events: ArrayQueue<HostEvent>,
    waker: AtomicWaker,
}

impl Shared {
    pub fn new(capacity: usize, root: usize, queue_depth: usize) -> Self {
        let nodes: Vec<Node> = (0..capacity).map(|_| Node::new()).collect();
        Self {
            nodes: nodes.into_boxed_slice(),
            root,
            events: ArrayQueue::new(queue_depth.max(1)),
            waker: AtomicWaker::new(),
        }
    }

    pub fn post(&self, event: HostEvent) {
        // A dropped event loses nothing: pending signals are drained on
        // every wake and the queue is non-empty anyway.
        let _ = self.events.push(event);
        self.waker.wake();
    }

    pub fn pop(&self) -> Option<HostEvent> {
        self.events.pop()
    }

    pub fn register(&self, waker: &core::task::Waker) {
        self.waker.register(waker);
    }

    /// Flags `signal` for `host`. Signals for a handle whose slot has since
    /// been recycled are dropped.
    pub fn raise(&self, host: HostId, signal: PortSignal) {
        let Some(node) = self.nodes.get(host.index()) else {
            return;
        };
        if node.generation.load(Ordering::Acquire) != host.generation() {
            debug!("stale host {host:?}, {signal:?} dropped");
            return;
        }
        node.signals.fetch_or(signal.bits(), Ordering::AcqRel);
        self.post(HostEvent::Port);
    }

    pub fn take_signals(&self, idx: usize) -> PortSignal {
        self.nodes
            .get(idx)
            .map(|node| PortSignal::from_bits_truncate(node.signals.swap(0, Ordering::AcqRel)))
            .unwrap_or(PortSignal::empty())
    }

    pub fn timer(&self, idx: usize) -> u32 {
        self.nodes
            .get(idx)
            .map(|node| node.timer.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Makes `driver` the target of frame ticks for `host`, or stops
    /// forwarding with `None`.
    pub fn publish(&self, host: HostId, driver: Option<Arc<dyn ClassOp>>) {
        if let Some(node) = self.nodes.get(host.index()) {
            *node.active.lock() = driver.map(|d| (host, d));
        }
    }

    pub fn link_child(&self, parent: usize, port: usize, child: usize) {
        if let Some(slot) = self.nodes.get(parent).and_then(|n| n.children.get(port)) {
            slot.store(child, Ordering::Release);
        }
    }

    pub fn unlink_child(&self, parent: usize, port: usize) {
        self.link_child(parent, port, NO_CHILD);
    }

    /// Hands a recycled node to `host` in its pristine state.
    pub fn reset_node(&self, host: HostId) {
        if let Some(node) = self.nodes.get(host.index()) {
            node.generation.store(host.generation(), Ordering::Release);
            node.timer.store(0, Ordering::Release);
            node.signals.store(0, Ordering::Release);
            *node.active.lock() = None;
            for child in &node.children {
                child.store(NO_CHILD, Ordering::Release);
            }
        }
    }

    fn frame_tick(&self, idx: usize) {
        let Some(node) = self.nodes.get(idx) else {
            return;
        };
        let timer = node.timer.fetch_add(1, Ordering::AcqRel).wrapping_add(1);

        // Skip the hook rather than wait if the task level is swapping drivers.
        if let Some(active) = node.active.try_lock()
            && let Some((host, driver)) = active.as_ref()
        {
            driver.frame_tick(&FrameContext { host: *host, timer });
        }

        for child in &node.children {
            let child = child.load(Ordering::Acquire);
            if child != NO_CHILD {
                self.frame_tick(child);
            }
        }
    }
}

/// Interrupt-side entry points of the host tree.
///
/// The transport calls these from its interrupt handlers. They only set flags
/// and queue wake-ups; the state machines react on the next task-level pass.
#[derive(Clone)]
pub struct EventHandler {
    shared: Arc<Shared>,
}

impl EventHandler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn connect(&self, host: HostId) {
        self.shared.raise(host, PortSignal::CONNECT);
    }

    pub fn disconnect(&self, host: HostId) {
        self.shared.raise(host, PortSignal::DISCONNECT);
    }

    pub fn port_enabled(&self, host: HostId) {
        self.shared.raise(host, PortSignal::PORT_ENABLED);
    }

    pub fn port_disabled(&self, host: HostId) {
        self.shared.raise(host, PortSignal::PORT_DISABLED);
    }

    pub fn transfer_complete(&self) {
        self.shared.post(HostEvent::TransferComplete);
    }

    /// Start-of-frame: advances every tick counter in the tree, root first,
    /// depth first, and forwards to the class drivers of active instances.
    pub fn frame_tick(&self) {
        self.shared.frame_tick(self.shared.root);
    }
}
