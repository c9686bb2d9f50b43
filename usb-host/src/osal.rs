use core::time::Duration;

/// Services the core needs from the platform.
pub trait KernelOp: Sync {
    /// Blocks the calling task for at least `duration`.
    fn delay(&self, duration: Duration);
}
