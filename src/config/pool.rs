//! Worker pool sizing and lifecycle configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PREFORK_MIN_SPARE` | `2` | Minimum number of available workers |
//! | `PREFORK_MAX_SPARE` | `4` | Maximum number of available workers |
//! | `PREFORK_MAX_CHILDREN` | `16` | Hard ceiling on worker processes |
//! | `PREFORK_MAX_REQUESTS` | `0` | Connections per worker before it retires (0 = unlimited) |
//! | `PREFORK_THREADS` | `0` | Threads per worker (0 = CPU count) |
//! | `PREFORK_GRACE_PERIOD` | `10s` | Shutdown grace period before SIGKILL |
//! | `PREFORK_REAP_INTERVAL` | `2s` | Bounded wait while a dead worker awaits reaping |

use std::time::Duration;

use super::parse::{env_duration, env_parse};
use super::ConfigError;

/// Default grace period given to in-flight jobs on shutdown.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default readiness-wait bound while reaping is pending.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive failed spawns (with no live worker) before the server gives up.
pub const DEFAULT_MAX_SPAWN_FAILURES: u32 = 10;

/// Worker pool configuration.
///
/// Values are normalized at construction: `threads_per_worker` is at least 1,
/// `min_spare` never exceeds `max_spare`, and `max_children` is clamped up to
/// `max_spare`.
///
/// ```rust,ignore
/// use std::time::Duration;
/// use prefork::PoolConfig;
///
/// let config = PoolConfig::new(2, 4, 8, 3)
///     .with_max_requests_per_worker(1000)
///     .with_grace_period(Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_spare: usize,
    pub max_spare: usize,
    pub max_children: usize,
    /// 0 = unlimited.
    pub max_requests_per_worker: u64,
    pub threads_per_worker: usize,
    pub grace_period: Duration,
    pub reap_interval: Duration,
    pub max_spawn_failures: u32,
}

impl PoolConfig {
    pub fn new(
        min_spare: usize,
        max_spare: usize,
        max_children: usize,
        threads_per_worker: usize,
    ) -> Self {
        let max_spare = max_spare.max(1);
        Self {
            min_spare: min_spare.min(max_spare),
            max_spare,
            max_children: max_children.max(max_spare),
            max_requests_per_worker: 0,
            threads_per_worker: threads_per_worker.max(1),
            grace_period: DEFAULT_GRACE_PERIOD,
            reap_interval: DEFAULT_REAP_INTERVAL,
            max_spawn_failures: DEFAULT_MAX_SPAWN_FAILURES,
        }
    }

    pub fn with_max_requests_per_worker(mut self, max: u64) -> Self {
        self.max_requests_per_worker = max;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        // A zero interval would turn the control loop into a busy spin
        self.reap_interval = interval.max(Duration::from_millis(10));
        self
    }

    pub fn with_max_spawn_failures(mut self, max: u32) -> Self {
        self.max_spawn_failures = max.max(1);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let min_spare = env_parse("PREFORK_MIN_SPARE", 2usize)?;
        let max_spare = env_parse("PREFORK_MAX_SPARE", 4usize)?;
        let max_children = env_parse("PREFORK_MAX_CHILDREN", 16usize)?;
        let max_requests = env_parse("PREFORK_MAX_REQUESTS", 0u64)?;
        let threads = Self::parse_threads()?;

        if max_spare == 0 {
            return Err(ConfigError::Invalid {
                key: "PREFORK_MAX_SPARE".into(),
                message: "at least one spare worker is required".into(),
            });
        }
        if min_spare > max_spare {
            return Err(ConfigError::Invalid {
                key: "PREFORK_MIN_SPARE".into(),
                message: format!("{} exceeds PREFORK_MAX_SPARE ({})", min_spare, max_spare),
            });
        }

        Ok(Self::new(min_spare, max_spare, max_children, threads)
            .with_max_requests_per_worker(max_requests)
            .with_grace_period(env_duration("PREFORK_GRACE_PERIOD", DEFAULT_GRACE_PERIOD)?)
            .with_reap_interval(env_duration("PREFORK_REAP_INTERVAL", DEFAULT_REAP_INTERVAL)?))
    }

    fn parse_threads() -> Result<usize, ConfigError> {
        let threads = env_parse("PREFORK_THREADS", 0usize)?;
        // Resolve 0 to CPU count
        Ok(if threads == 0 { num_cpus::get() } else { threads })
    }
}
