//! Environment variable parsing utilities.

use std::str::FromStr;
use std::time::Duration;

use super::ConfigError;

/// Get environment variable with default value.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get optional environment variable (None if empty or missing).
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Parse environment variable with type conversion.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
            key: key.into(),
            value: v,
            error: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Parse duration string (e.g., "250ms", "10s", "2m", "1h").
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "" | "s" => Ok(Duration::from_secs(num)),
        "m" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 3600)),
        _ => Err(format!("invalid unit: {}", unit)),
    }
}

/// Parse environment variable as duration.
pub fn env_duration(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env_opt(key) {
        Some(value) => parse_duration(&value).map_err(|e| ConfigError::Parse {
            key: key.into(),
            value,
            error: e,
        }),
        None => Ok(default),
    }
}
