//! `[logging]` section: level, output format and per-module overrides

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Output format for `tracing` events on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// How much the governor says and in what shape.
///
/// Dispatches and settlements log at debug, throttling at warn, so `debug` on
/// `limiter` and `retry` shows every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level applied to everything
    pub level: String,
    pub format: LogFormat,
    /// Levels for individual `pacer` modules, keyed by module name such as
    /// `limiter`, `retry`, `http` or `queue`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_levels: Option<HashMap<String, String>>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            component_levels: None,
        }
    }
}
