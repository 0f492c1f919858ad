//! Listening socket configuration.

use std::net::SocketAddr;

use super::parse::{env_or, env_parse};
use super::ConfigError;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Listener configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub addr: SocketAddr,
    /// Kernel accept backlog shared by all workers.
    pub backlog: i32,
}

impl ListenerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env_or("LISTEN_ADDR", "0.0.0.0:8080");
        let addr = raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Parse {
            key: "LISTEN_ADDR".into(),
            value: raw.clone(),
            error: e.to_string(),
        })?;

        let backlog = env_parse("LISTEN_BACKLOG", DEFAULT_BACKLOG)?;
        if backlog <= 0 {
            return Err(ConfigError::Invalid {
                key: "LISTEN_BACKLOG".into(),
                message: "backlog must be positive".into(),
            });
        }

        Ok(Self { addr, backlog })
    }
}
