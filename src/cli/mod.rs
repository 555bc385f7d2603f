//! CLI module for pacer
//!
//! Command-line interface definitions and handlers.
//!
//! # Commands
//!
//! - `probe` - Send requests to a URL through the rate limiter
//! - `classify` - Show the tier an endpoint label resolves to
//! - `config` - Configuration utilities (init)
//! - `completions` - Generate shell completions
//!
//! # Example
//!
//! ```bash
//! # Fire 20 GETs at a CRM endpoint, 2 per second
//! pacer probe https://crm.example.com/api/users --count 20 --rps 2
//!
//! # Which tier does a path land in?
//! pacer classify /api/stores/12/leads
//! ```

pub mod classify;
pub mod completions;
pub mod config;
pub mod output;
pub mod probe;

pub use classify::handle_classify;
pub use completions::handle_completions;
pub use config::handle_config_init;
pub use probe::handle_probe;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// pacer - Outbound request governor
#[derive(Parser, Debug)]
#[command(
    name = "pacer",
    version,
    about = "Outbound request governor with priority queuing, pacing and 429-aware retry"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send requests to a URL through the rate limiter
    Probe(ProbeArgs),
    /// Show the tier an endpoint label resolves to
    Classify(ClassifyArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Target URL
    pub url: String,

    /// Endpoint label used for classification (defaults to the URL path)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Path to configuration file
    #[arg(short, long, default_value = "pacer.toml")]
    pub config: PathBuf,

    /// Override maximum concurrent requests
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Override requests per second
    #[arg(long)]
    pub rps: Option<f64>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "PACER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Endpoint label or request path
    pub endpoint: String,

    /// Path to configuration file
    #[arg(short, long, default_value = "pacer.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Initialize a new configuration file
    Init(ConfigInitArgs),
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Output file path
    #[arg(short, long, default_value = "pacer.toml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
