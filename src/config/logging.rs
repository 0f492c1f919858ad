//! Logging configuration.

use super::parse::{env_opt, env_or};
use super::ConfigError;

/// Output format for log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable `tracing_subscriber` fmt output.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Log level filter (from LOG_LEVEL or RUST_LOG).
    pub filter: String,
    /// Output format (LOG_FORMAT).
    pub format: LogFormat,
    /// Service name for structured logging.
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "prefork=info".to_string(),
            format: LogFormat::Text,
            service_name: "prefork".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Load configuration from environment variables.
    ///
    /// LOG_LEVEL accepts simple values: trace, debug, info, warn, error
    /// RUST_LOG accepts full tracing filter syntax: prefork=debug,other=warn
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            filter: Self::resolve_log_filter(),
            format: Self::parse_format()?,
            service_name: env_or("SERVICE_NAME", "prefork"),
        })
    }

    /// Resolve log filter from environment.
    ///
    /// Priority: LOG_LEVEL > RUST_LOG > default (info)
    fn resolve_log_filter() -> String {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            let level = level.to_lowercase();
            match level.as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => {
                    return format!("prefork={}", level);
                }
                _ => {
                    // Logging is not up yet
                    eprintln!(
                        "Warning: Invalid LOG_LEVEL '{}', expected: trace, debug, info, warn, error",
                        level
                    );
                }
            }
        }

        if let Some(filter) = env_opt("RUST_LOG") {
            return filter;
        }

        "prefork=info".to_string()
    }

    fn parse_format() -> Result<LogFormat, ConfigError> {
        match env_or("LOG_FORMAT", "text").to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid {
                key: "LOG_FORMAT".into(),
                message: format!("expected text or json, got '{}'", other),
            }),
        }
    }
}
