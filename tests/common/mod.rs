//! Shared test utilities for pacer integration tests.
//!
//! Provides a throttle-aware error type, a call recorder and limiter
//! configurations tuned for fast or paused-clock tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use pacer::config::LimiterConfig;
use pacer::ThrottleSignal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Error Type
// =============================================================================

/// Failure returned by test thunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestError {
    /// Server said "too many requests" on the given attempt.
    Throttled {
        attempt: u32,
        retry_after: Option<Duration>,
    },
    /// Any other failure.
    Failed(u16),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Throttled { attempt, .. } => write!(f, "429 on attempt {}", attempt),
            TestError::Failed(status) => write!(f, "HTTP {}", status),
        }
    }
}

impl std::error::Error for TestError {}

impl ThrottleSignal for TestError {
    fn is_throttled(&self) -> bool {
        matches!(self, TestError::Throttled { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TestError::Throttled { retry_after, .. } => *retry_after,
            TestError::Failed(_) => None,
        }
    }
}

// =============================================================================
// Configurations
// =============================================================================

/// Limits loose enough that pacing and jitter never get in the way.
pub fn fast_config(max_concurrent_requests: usize) -> LimiterConfig {
    LimiterConfig {
        max_concurrent_requests,
        requests_per_second: 1000.0,
        base_retry_delay_ms: 10,
        max_jitter_ms: 0,
        poll_interval_ms: 5,
    }
}

/// Default timings without jitter, for exact backoff assertions.
pub fn no_jitter_config(max_concurrent_requests: usize) -> LimiterConfig {
    LimiterConfig {
        max_concurrent_requests,
        max_jitter_ms: 0,
        ..LimiterConfig::default()
    }
}

// =============================================================================
// Call Recorder
// =============================================================================

/// Records which thunk started when.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    starts: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: &str) {
        self.starts
            .lock()
            .unwrap()
            .push((label.to_string(), Instant::now()));
    }

    /// A thunk that records its start and succeeds.
    pub fn thunk(
        &self,
        label: &str,
    ) -> impl FnMut() -> BoxFuture<'static, Result<String, TestError>> + Send + 'static {
        let recorder = self.clone();
        let label = label.to_string();
        move || {
            recorder.record(&label);
            let label = label.clone();
            async move { Ok(label) }.boxed()
        }
    }

    /// A thunk that is throttled `throttles` times before succeeding.
    pub fn flaky_thunk(
        &self,
        label: &str,
        throttles: u32,
        retry_after: Option<Duration>,
    ) -> impl FnMut() -> BoxFuture<'static, Result<u32, TestError>> + Send + 'static {
        let recorder = self.clone();
        let label = label.to_string();
        let mut attempt = 0;
        move || {
            recorder.record(&label);
            attempt += 1;
            let result = if attempt <= throttles {
                Err(TestError::Throttled {
                    attempt,
                    retry_after,
                })
            } else {
                Ok(attempt)
            };
            async move { result }.boxed()
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    /// Time between consecutive starts.
    pub fn gaps(&self) -> Vec<Duration> {
        self.instants()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
