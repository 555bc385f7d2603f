//! pacer - Outbound request governor
//!
//! Smooths bursts of outbound API calls and recovers from server-side rate
//! limiting. Calls are queued by endpoint priority, dispatched no faster than
//! a configured rate with a cap on concurrent calls, and retried with
//! exponential backoff and jitter when the server answers 429.

pub mod classifier;
pub mod cli;
pub mod config;
pub mod gate;
pub mod http;
pub mod limiter;
pub mod logging;
pub mod queue;
pub mod retry;

pub use classifier::{EndpointTable, EndpointTier};
pub use config::PacerConfig;
pub use limiter::{LimiterError, LimiterStats, LimiterUpdate, RateLimiter};
pub use retry::ThrottleSignal;
