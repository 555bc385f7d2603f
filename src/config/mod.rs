//! Configuration module for pacer
//!
//! Provides layered configuration loading from files, environment variables, and defaults.
//!
//! # Configuration Precedence
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`PACER_*`)
//! 3. Configuration file (TOML)
//! 4. Default values (lowest priority)
//!
//! # Example
//!
//! ```rust
//! use pacer::config::PacerConfig;
//!
//! let config = PacerConfig::default();
//! assert_eq!(config.limiter.max_concurrent_requests, 3);
//!
//! let toml = r#"
//! [limiter]
//! requests_per_second = 1.0
//!
//! [endpoints."/reports"]
//! priority = 2
//! max_retries = 0
//! "#;
//! let config: PacerConfig = toml::from_str(toml).unwrap();
//! assert_eq!(config.limiter.requests_per_second, 1.0);
//! assert_eq!(config.endpoints.classify("/reports/q1").priority, 2);
//! ```

pub mod error;
pub mod http;
pub mod limiter;
pub mod logging;

pub use error::ConfigError;
pub use http::HttpConfig;
pub use limiter::LimiterConfig;
pub use logging::{LogFormat, LoggingConfig};

use crate::classifier::{EndpointTable, DEFAULT_KEY};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unified configuration.
///
/// An `[endpoints]` table in a file replaces the built-in tiers; a missing
/// `"default"` entry is filled in with the fallback tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PacerConfig {
    /// Concurrency, pacing and backoff settings
    pub limiter: LimiterConfig,
    /// Endpoint substring to tier mapping
    pub endpoints: EndpointTable,
    /// Paced HTTP client settings
    pub http: HttpConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl PacerConfig {
    /// Load configuration from a TOML file
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supports PACER_* environment variables for common settings.
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("PACER_MAX_CONCURRENT") {
            if let Ok(n) = value.parse() {
                self.limiter.max_concurrent_requests = n;
            }
        }
        if let Ok(value) = std::env::var("PACER_REQUESTS_PER_SECOND") {
            if let Ok(rate) = value.parse() {
                self.limiter.requests_per_second = rate;
            }
        }
        if let Ok(url) = std::env::var("PACER_BASE_URL") {
            self.http.base_url = Some(url);
        }

        if let Ok(level) = std::env::var("PACER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PACER_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limiter.validate()?;

        for (key, _) in self.endpoints.iter() {
            if key.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "endpoints",
                    "endpoint keys cannot be empty",
                ));
            }
        }
        if self.endpoints.get(DEFAULT_KEY).is_none() {
            return Err(ConfigError::invalid(
                "endpoints.default",
                "a default tier is required",
            ));
        }

        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "http.timeout_seconds",
                "timeout must be non-zero",
            ));
        }

        Ok(())
    }
}
