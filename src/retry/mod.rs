//! Retry and backoff
//!
//! Runs one attempt of a dispatched request and decides what happens next.
//! Throttling failures (HTTP 429 or equivalent) are retried with exponential
//! backoff plus jitter until the endpoint's retry budget is spent; every other
//! failure, and a throttling failure on the last allowed attempt, is handed to
//! the caller as is.

use crate::gate::InFlightGuard;
use crate::queue::QueuedRequest;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Exponent cap for `2^retry_count`; keeps the multiplier inside `u32`.
const MAX_BACKOFF_EXPONENT: u32 = 31;

/// Inspects a failure for a rate-limit signal.
pub trait ThrottleSignal {
    /// Whether the failure means "too many requests".
    fn is_throttled(&self) -> bool;

    /// Server-suggested wait before trying again.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl ThrottleSignal for reqwest::Error {
    fn is_throttled(&self) -> bool {
        self.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
    }
}

impl ThrottleSignal for anyhow::Error {
    fn is_throttled(&self) -> bool {
        if let Some(err) = self.downcast_ref::<crate::http::HttpError>() {
            return err.is_throttled();
        }
        self.downcast_ref::<reqwest::Error>()
            .is_some_and(ThrottleSignal::is_throttled)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.downcast_ref::<crate::http::HttpError>()
            .and_then(ThrottleSignal::retry_after)
    }
}

/// Result of running a request once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The call succeeded; its value is held for delivery.
    Resolved,
    /// The call failed terminally; its error is held for delivery.
    Rejected,
    /// The call was throttled and may be retried.
    Throttled { retry_after: Option<Duration> },
}

/// A queued call with its caller's continuation.
///
/// `attempt` may run several times. It records the outcome of a terminal
/// attempt, which `settle` later delivers to the caller. Implementations must
/// report [`Attempt::Rejected`] rather than [`Attempt::Throttled`] when
/// `final_attempt` is set.
#[async_trait]
pub trait PendingCall: Send {
    async fn attempt(&mut self, final_attempt: bool) -> Attempt;

    fn settle(self: Box<Self>);
}

/// How long to wait before retrying a throttled request.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Jitter is drawn uniformly from `[0, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_jitter: Duration) -> Self {
        Self { max_jitter }
    }

    /// `retry_delay * 2^retry_count`, saturating.
    pub fn exponential(retry_delay: Duration, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.min(MAX_BACKOFF_EXPONENT));
        retry_delay.saturating_mul(factor)
    }

    /// Delay for a given jitter sample: `max(server_wait, exponential) + jitter`.
    pub fn delay_with_jitter(
        retry_delay: Duration,
        retry_count: u32,
        server_wait: Option<Duration>,
        jitter: Duration,
    ) -> Duration {
        let exponential = Self::exponential(retry_delay, retry_count);
        server_wait
            .unwrap_or(Duration::ZERO)
            .max(exponential)
            .saturating_add(jitter)
    }

    pub fn sample_jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }

    pub fn delay(
        &self,
        retry_delay: Duration,
        retry_count: u32,
        server_wait: Option<Duration>,
    ) -> Duration {
        Self::delay_with_jitter(retry_delay, retry_count, server_wait, self.sample_jitter())
    }
}

/// What the executor did with a dispatched request.
#[derive(Debug)]
pub enum Settlement {
    Resolved,
    Rejected,
    /// Backoff elapsed; the request must go back to the head of the queue.
    /// The slot is still held so nothing overtakes it before it is requeued.
    Retry {
        request: QueuedRequest,
        guard: InFlightGuard,
    },
}

/// Run one attempt of `request`.
///
/// The in-flight slot is held for the attempt and, when throttled, for the
/// backoff sleep too, in which case it travels back with the request. It is
/// released before the caller sees a terminal result.
pub async fn execute(
    mut request: QueuedRequest,
    backoff: &BackoffPolicy,
    guard: InFlightGuard,
) -> Settlement {
    let final_attempt = request.is_final_attempt();
    let attempt = request.call.attempt(final_attempt).await;

    match attempt {
        Attempt::Resolved => {
            drop(guard);
            record_outcome(&request.endpoint, "resolved");
            tracing::debug!(
                request_id = %request.id,
                endpoint = %request.endpoint,
                attempts = request.retry_count + 1,
                "Request resolved"
            );
            request.settle();
            Settlement::Resolved
        }
        Attempt::Throttled { retry_after } if !final_attempt => {
            let delay = backoff.delay(request.retry_delay, request.retry_count, retry_after);
            metrics::counter!("pacer_retries_total", "endpoint" => request.endpoint.clone())
                .increment(1);
            tracing::warn!(
                request_id = %request.id,
                endpoint = %request.endpoint,
                retry = request.retry_count + 1,
                max_retries = request.max_retries,
                retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                delay_ms = delay.as_millis() as u64,
                "Request throttled, backing off"
            );
            tokio::time::sleep(delay).await;
            request.retry_count += 1;
            Settlement::Retry { request, guard }
        }
        Attempt::Rejected | Attempt::Throttled { .. } => {
            drop(guard);
            record_outcome(&request.endpoint, "rejected");
            tracing::debug!(
                request_id = %request.id,
                endpoint = %request.endpoint,
                attempts = request.retry_count + 1,
                "Request rejected"
            );
            request.settle();
            Settlement::Rejected
        }
    }
}

fn record_outcome(endpoint: &str, outcome: &'static str) {
    metrics::counter!(
        "pacer_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
