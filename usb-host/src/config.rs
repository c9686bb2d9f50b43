use core::time::Duration;

/// When a failed control request may end an enumeration attempt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Every enumeration state gives up when the same failure is observed
    /// twice in a row.
    #[default]
    EveryState,
    /// Only the first request (partial device descriptor) can fail the
    /// attempt; later states keep retrying until the device answers.
    FirstStateOnly,
}

/// Host tuning knobs.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Debounce after a connection, before the port is reset.
    pub connect_settle: Duration,
    /// Wait after the port reset completed.
    pub reset_settle: Duration,
    /// Recovery time granted to the device after SET_ADDRESS.
    pub set_address_settle: Duration,
    /// Power-off time during a re-enumeration.
    pub re_enumerate_settle: Duration,
    /// Pause before a failed control request is retried.
    pub retry_delay: Duration,
    pub disconnect_settle: Duration,
    pub retry_policy: RetryPolicy,
    /// Root plus every child the tree may hold at once.
    pub max_instances: usize,
    pub event_queue_depth: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connect_settle: Duration::from_millis(200),
            reset_settle: Duration::from_millis(100),
            set_address_settle: Duration::from_millis(2),
            re_enumerate_settle: Duration::from_millis(200),
            retry_delay: Duration::from_millis(1),
            disconnect_settle: Duration::from_millis(1),
            retry_policy: RetryPolicy::EveryState,
            max_instances: 8,
            event_queue_depth: 10,
        }
    }
}
