/// Failure code of a single transfer as reported by the controller.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferError {
    #[error("Stall")]
    Stall,
    #[error("Timeout")]
    Timeout,
    #[error("Transaction error")]
    Transaction,
    #[error("Babble")]
    Babble,
    #[error("Data toggle mismatch")]
    DataToggle,
    #[error("Pipe not open")]
    PipeNotOpen,
    #[error("Controller error: {0:#x}")]
    Other(u8),
}

/// Stage of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlStage {
    Setup,
    Data,
    Status,
}

/// Opaque status of a failed control request.
///
/// Two failures compare equal when they failed in the same stage with the same
/// code; the enumeration engine uses that to detect a device stuck on the
/// same error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("control request failed in {stage:?} stage: {error}")]
pub struct ControlError {
    pub stage: ControlStage,
    pub error: TransferError,
}

impl ControlError {
    pub fn new(stage: ControlStage, error: TransferError) -> Self {
        Self { stage, error }
    }
}

/// Result of a non-blocking control request.
pub type ControlResult<T = ()> = nb::Result<T, ControlError>;
