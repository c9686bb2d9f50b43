//! Logical pipe bookkeeping.
//!
//! The registry only records which channels are taken and with which
//! endpoint; programming the channel is left to the transport.

use usb_if::host::{PipeConfig, PipeId, TransportOp};

use crate::{
    consts::MAX_PIPES,
    err::{Result, USBError},
};

/// An allocated pipe: the instance holding it and the endpoint it serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    owner: usize,
    ep_addr: u8,
}

/// Pipe table shared by every instance of the tree.
///
/// Each slot remembers the instance (by arena index) that allocated it, so
/// one instance can neither use nor release another's pipes.
#[derive(Debug, Clone)]
pub struct PipeRegistry {
    slots: [Option<Slot>; MAX_PIPES],
}

impl Default for PipeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_PIPES],
        }
    }

    /// Reserves the lowest free pipe for endpoint `ep_addr` on behalf of
    /// instance `owner`.
    pub fn alloc(&mut self, owner: usize, ep_addr: u8) -> Result<PipeId> {
        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(USBError::NoFreePipe)?;
        self.slots[idx] = Some(Slot { owner, ep_addr });
        Ok(PipeId(idx as u8))
    }

    fn check(&self, owner: usize, pipe: PipeId) -> Result<()> {
        match self.slots.get(pipe.as_usize()).copied().flatten() {
            Some(slot) if slot.owner == owner => Ok(()),
            _ => Err(USBError::InvalidPipe(pipe.0)),
        }
    }

    /// (Re)opens a pipe `owner` holds with `config`.
    ///
    /// Reopening is how the control pipes follow the device through address
    /// and packet size changes.
    pub fn open(
        &mut self,
        transport: &mut dyn TransportOp,
        owner: usize,
        pipe: PipeId,
        config: &PipeConfig,
    ) -> Result<()> {
        self.check(owner, pipe)?;
        transport.open_pipe(pipe, config)?;
        Ok(())
    }

    /// Releases `pipe`, closing the channel behind it.
    pub fn free(
        &mut self,
        transport: &mut dyn TransportOp,
        owner: usize,
        pipe: PipeId,
    ) -> Result<()> {
        self.check(owner, pipe)?;
        self.slots[pipe.as_usize()] = None;
        transport.close_pipe(pipe);
        Ok(())
    }

    /// Releases and closes whatever `owner` still holds.
    pub fn free_owned(&mut self, transport: &mut dyn TransportOp, owner: usize) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some_and(|s| s.owner == owner) {
                *slot = None;
                transport.close_pipe(PipeId(idx as u8));
            }
        }
    }

    /// Forgets the allocations of `owner` without touching the transport.
    pub fn clear_owned(&mut self, owner: usize) {
        for slot in &mut self.slots {
            if slot.is_some_and(|s| s.owner == owner) {
                *slot = None;
            }
        }
    }

    pub fn endpoint(&self, pipe: PipeId) -> Option<u8> {
        self.slots
            .get(pipe.as_usize())
            .copied()
            .flatten()
            .map(|s| s.ep_addr)
    }

    pub fn owner(&self, pipe: PipeId) -> Option<usize> {
        self.slots
            .get(pipe.as_usize())
            .copied()
            .flatten()
            .map(|s| s.owner)
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn owned_by(&self, owner: usize) -> usize {
        self.slots
            .iter()
            .filter(|s| s.is_some_and(|s| s.owner == owner))
            .count()
    }
}
