//! Configuration module for prefork.
//!
//! This module provides centralized configuration loading from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use prefork::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.listener.addr);
//! println!("Threads per worker: {}", config.pool.threads_per_worker);
//! ```

mod error;
mod listener;
mod logging;
mod parse;
mod pool;

pub use error::ConfigError;
pub use listener::{ListenerConfig, DEFAULT_BACKLOG};
pub use logging::{LogFormat, LoggingConfig};
pub use parse::{env_or, parse_duration};
pub use pool::{
    PoolConfig, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_SPAWN_FAILURES, DEFAULT_REAP_INTERVAL,
};

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Listening socket configuration.
    pub listener: ListenerConfig,
    /// Worker pool configuration.
    pub pool: PoolConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            listener: ListenerConfig::from_env()?,
            pool: PoolConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {} (backlog {})", self.listener.addr, self.listener.backlog);
        info!(
            "  Spare workers: {}..{} (max {} workers)",
            self.pool.min_spare, self.pool.max_spare, self.pool.max_children
        );
        info!("  Threads per worker: {}", self.pool.threads_per_worker);

        if self.pool.max_requests_per_worker > 0 {
            info!(
                "  Worker recycling: after {} connections",
                self.pool.max_requests_per_worker
            );
        } else {
            info!("  Worker recycling: disabled");
        }

        info!("  Grace period: {:?}", self.pool.grace_period);
    }
}
