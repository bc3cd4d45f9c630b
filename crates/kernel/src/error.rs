//! Simulation failures.

use thiserror::Error;

/// A failure raised by model code inside a process.
///
/// Failures travel along the continuation's error path until a handler
/// installed with [`Process::catch`](crate::process::Process::catch)
/// consumes them. An unhandled failure in a catch-enabled process is
/// recorded on its [`ProcessId`](crate::process::ProcessId); in any
/// other process it aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    message: String,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
