//! Thread pool error types.

use std::fmt;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool has been shut down and accepts no more tasks.
    Shutdown,

    /// A task panicked on a pool thread.
    TaskPanic(String),

    /// A pool thread could not be started.
    Spawn(String),
}

impl PoolError {
    /// Check if this is a shutdown error.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, PoolError::Shutdown)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Shutdown => write!(f, "pool has been shut down"),
            PoolError::TaskPanic(msg) => write!(f, "task panic: {}", msg),
            PoolError::Spawn(msg) => write!(f, "failed to start pool thread: {}", msg),
        }
    }
}

impl std::error::Error for PoolError {}

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
