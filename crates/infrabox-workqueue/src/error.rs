// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Work queue and dispatcher error type
#[derive(Error, Debug, Diagnostic)]
pub enum WorkQueueError {
    /// Dispatcher configured without workers
    #[error("Invalid dispatcher configuration: {message}")]
    #[diagnostic(code(workqueue::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        message: String,
        suggestion: String,
    },

    /// One or more worker tasks panicked
    #[error("{count} worker(s) of '{queue}' terminated abnormally")]
    #[diagnostic(
        code(workqueue::worker_panicked),
        help("A reconciler panicked while syncing; the log above names the key being processed")
    )]
    WorkerPanicked { queue: String, count: usize },
}

/// Result type for work queue operations
pub type Result<T> = std::result::Result<T, WorkQueueError>;

impl WorkQueueError {
    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}
