use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    #[error("Appointment store failed during {operation}: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Sweep runner is already running")]
    AlreadyRunning,

    #[error("Sweep runner is not running")]
    NotRunning,

    #[error("Sweep task failed: {0}")]
    Join(String),
}

impl SweepError {
    /// Whether the next tick may succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SweepError::Store { .. } | SweepError::Timeout { .. })
    }
}
