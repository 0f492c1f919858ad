//! Server error types.
//!
//! Only setup failures surface as [`Error`]. Failures that happen while the
//! pool is running (spawn exhaustion, dead workers, broken control channels,
//! lost accept races) are absorbed by the control loop and logged.

use std::fmt;

use crate::worker::PoolError;

/// Errors returned from [`crate::Server::run`] and its setup helpers.
#[derive(Debug)]
pub enum Error {
    /// I/O error (listener setup, self-pipe creation).
    Io(std::io::Error),

    /// System call failure reported by nix.
    Sys(nix::Error),

    /// Installing a signal handler failed.
    Signal {
        signal: i32,
        error: std::io::Error,
    },

    /// A worker could not start its thread pool.
    Pool(PoolError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Sys(e) => write!(f, "system error: {}", e),
            Error::Signal { signal, error } => {
                write!(f, "failed to install handler for signal {}: {}", signal, error)
            }
            Error::Pool(e) => write!(f, "thread pool error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Sys(e) => Some(e),
            Error::Signal { error, .. } => Some(error),
            Error::Pool(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Sys(e)
    }
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        Error::Pool(e)
    }
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;
