//! Rate limiter configuration

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ceilings and timings for the request governor.
///
/// # Example
///
/// ```toml
/// [limiter]
/// max_concurrent_requests = 3
/// requests_per_second = 5.0
/// base_retry_delay_ms = 1000
/// max_jitter_ms = 1000
/// poll_interval_ms = 100
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum requests dispatched but not yet settled.
    ///
    /// Default: 3
    pub max_concurrent_requests: usize,

    /// Dispatch rate ceiling; successive dispatches are spaced by
    /// `1000 / requests_per_second` milliseconds.
    ///
    /// Default: 5.0
    pub requests_per_second: f64,

    /// Base backoff delay, doubled for every retry already consumed.
    ///
    /// Default: 1000 ms
    pub base_retry_delay_ms: u64,

    /// Upper bound (exclusive) of the random jitter added to each backoff.
    /// Zero disables jitter.
    ///
    /// Default: 1000 ms
    pub max_jitter_ms: u64,

    /// Sleep between checks while the concurrency ceiling is reached.
    ///
    /// Default: 100 ms
    pub poll_interval_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 3,
            requests_per_second: 5.0,
            base_retry_delay_ms: 1000,
            max_jitter_ms: 1000,
            poll_interval_ms: 100,
        }
    }
}

impl LimiterConfig {
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_max_concurrent(self.max_concurrent_requests)?;
        validate_rate(self.requests_per_second)?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "limiter.poll_interval_ms",
                "poll interval must be non-zero",
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_max_concurrent(value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(
            "limiter.max_concurrent_requests",
            "at least one request must be allowed in flight",
        ));
    }
    Ok(())
}

pub(crate) fn validate_rate(value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(
            "limiter.requests_per_second",
            format!("must be a positive number, got {}", value),
        ));
    }
    Ok(())
}
