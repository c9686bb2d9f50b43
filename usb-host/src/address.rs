//! Device address allocation.

use crate::{
    consts::MAX_NUM_DEVICE,
    err::{Result, USBError},
};

/// Bitmap of the device addresses in use, bit `n` stands for address `n + 1`.
///
/// Address 0 is the default address every device answers to before
/// SET_ADDRESS and is never handed out.
#[derive(Debug, Default, Clone)]
pub struct AddressPool {
    used: u128,
}

impl AddressPool {
    pub const fn new() -> Self {
        Self { used: 0 }
    }

    /// Gives the device at `address` a unique address.
    ///
    /// A device that already holds one keeps it. Otherwise the lowest free
    /// address is taken and written back to `address`.
    pub fn acquire(&mut self, address: &mut u8) -> Result<u8> {
        if *address != 0 {
            return Ok(*address);
        }
        let slot = (0..MAX_NUM_DEVICE)
            .find(|&slot| self.used & (1 << slot) == 0)
            .ok_or(USBError::AddressExhausted)?;
        self.used |= 1 << slot;
        *address = slot as u8 + 1;
        Ok(*address)
    }

    /// Returns the device's address to the pool and resets it to 0.
    pub fn release(&mut self, address: &mut u8) {
        if *address == 0 {
            return;
        }
        self.used &= !(1 << (*address - 1));
        *address = 0;
    }

    pub fn is_used(&self, address: u8) -> bool {
        address != 0 && (address as usize) <= MAX_NUM_DEVICE && self.used & (1 << (address - 1)) != 0
    }

    pub fn in_use(&self) -> usize {
        self.used.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }
}
