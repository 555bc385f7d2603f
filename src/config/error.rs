//! Errors from loading or validating `pacer.toml`

use std::path::PathBuf;
use thiserror::Error;

/// Why a limiter configuration was refused.
///
/// Also returned by `RateLimiter::configure` for out-of-range updates.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),

    /// An explicit `--config` path that does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("malformed TOML: {0}")]
    Parse(String),

    /// `field` is the dotted TOML path, e.g. `limiter.requests_per_second`.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
