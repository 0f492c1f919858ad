//! Configuration error types.

use std::fmt;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to parse environment variable.
    Parse {
        key: String,
        value: String,
        error: String,
    },
    /// Value parsed but violates a constraint.
    Invalid { key: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { key, value, error } => {
                write!(f, "failed to parse {}='{}': {}", key, value, error)
            }
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid value for {}: {}", key, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
