//! Outbound request governor
//!
//! [`RateLimiter`] is a cloneable handle to a single scheduler task. The
//! scheduler owns the queue, the pacing gate, the endpoint table and the
//! ceilings; handles only send it commands, so there is exactly one mutator
//! and exactly one processing loop per limiter.
//!
//! # Example
//!
//! ```rust,no_run
//! use pacer::classifier::EndpointTable;
//! use pacer::config::LimiterConfig;
//! use pacer::limiter::RateLimiter;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new(LimiterConfig::default(), EndpointTable::default());
//! let client = reqwest::Client::new();
//!
//! let body = limiter
//!     .enqueue("/users", move || {
//!         let client = client.clone();
//!         async move {
//!             client
//!                 .get("https://crm.example.com/api/users")
//!                 .send()
//!                 .await?
//!                 .error_for_status()?
//!                 .text()
//!                 .await
//!         }
//!     })
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

mod call;
mod scheduler;

pub use scheduler::LimiterStats;

use crate::classifier::{EndpointTable, EndpointTier};
use crate::config::{ConfigError, LimiterConfig, PacerConfig};
use crate::gate::InFlight;
use crate::queue::QueuedRequest;
use crate::retry::{PendingCall, ThrottleSignal};
use call::TypedCall;
use scheduler::{Counters, Scheduler};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Failure of an enqueued call.
#[derive(Debug, Error)]
pub enum LimiterError<E> {
    /// The call's own error, exactly as the call returned it.
    #[error(transparent)]
    Request(E),

    /// The limiter shut down before the call settled.
    #[error("rate limiter is shut down")]
    Closed,

    /// The call panicked. The limiter keeps running.
    #[error("call panicked: {0}")]
    Panicked(String),
}

impl<E> LimiterError<E> {
    /// The call's error, if that is what this is.
    pub fn into_request(self) -> Option<E> {
        match self {
            LimiterError::Request(e) => Some(e),
            LimiterError::Closed | LimiterError::Panicked(_) => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, LimiterError::Closed)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, LimiterError::Panicked(_))
    }
}

/// Failure to apply a [`LimiterUpdate`].
#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error("rate limiter is shut down")]
    Closed,
}

/// Runtime reconfiguration. Unset fields are left alone; endpoint tiers are
/// merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimiterUpdate {
    pub max_concurrent_requests: Option<usize>,
    pub requests_per_second: Option<f64>,
    pub endpoint_configs: Option<BTreeMap<String, EndpointTier>>,
}

impl LimiterUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent_requests(mut self, value: usize) -> Self {
        self.max_concurrent_requests = Some(value);
        self
    }

    pub fn requests_per_second(mut self, value: f64) -> Self {
        self.requests_per_second = Some(value);
        self
    }

    pub fn endpoint(mut self, key: impl Into<String>, tier: EndpointTier) -> Self {
        self.endpoint_configs
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), tier);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max) = self.max_concurrent_requests {
            crate::config::limiter::validate_max_concurrent(max)?;
        }
        if let Some(rate) = self.requests_per_second {
            crate::config::limiter::validate_rate(rate)?;
        }
        Ok(())
    }
}

pub(crate) enum Command {
    Enqueue {
        endpoint: String,
        call: Box<dyn PendingCall>,
    },
    Requeue(QueuedRequest),
    Configure(LimiterUpdate),
}

/// Handle to a running request governor.
#[derive(Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

struct Shared {
    tx: mpsc::UnboundedSender<Command>,
    in_flight: InFlight,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("stats", &self.stats())
            .finish()
    }
}

impl RateLimiter {
    /// Start a limiter. Must be called from within a tokio runtime.
    ///
    /// The scheduler stops when [`shutdown`](Self::shutdown) is called or the
    /// last handle is dropped.
    pub fn new(config: LimiterConfig, endpoints: EndpointTable) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = InFlight::new();
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let scheduler = Scheduler::new(
            &config,
            endpoints,
            rx,
            tx.clone(),
            in_flight.clone(),
            Arc::clone(&counters),
        );
        scheduler.start(cancel.clone());

        Self {
            shared: Arc::new(Shared {
                tx,
                in_flight,
                counters,
                cancel,
            }),
        }
    }

    /// Start a limiter from the unified configuration.
    pub fn from_config(config: &PacerConfig) -> Self {
        Self::new(config.limiter.clone(), config.endpoints.clone())
    }

    /// Queue `thunk` under `endpoint` and wait for its terminal result.
    ///
    /// `thunk` is invoked once per attempt, so throttled calls can be retried.
    /// A successful value or a terminal error is returned unchanged; a panic in
    /// the call surfaces as [`LimiterError::Panicked`].
    pub async fn enqueue<T, E, F, Fut>(
        &self,
        endpoint: impl Into<String>,
        thunk: F,
    ) -> Result<T, LimiterError<E>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: ThrottleSignal + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let call = TypedCall::new(thunk, reply);

        self.shared
            .tx
            .send(Command::Enqueue {
                endpoint: endpoint.into(),
                call: Box::new(call),
            })
            .map_err(|_| LimiterError::Closed)?;

        rx.await.unwrap_or(Err(LimiterError::Closed))
    }

    /// Apply a runtime reconfiguration.
    ///
    /// Takes effect before any request enqueued afterwards through the same
    /// handle is classified.
    pub fn configure(&self, update: LimiterUpdate) -> Result<(), ConfigureError> {
        update.validate()?;
        self.shared
            .tx
            .send(Command::Configure(update))
            .map_err(|_| ConfigureError::Closed)
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> LimiterStats {
        self.shared.counters.snapshot(self.shared.in_flight.current())
    }

    /// Requests dispatched but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.current()
    }

    /// Stop the scheduler. Requests not yet dispatched fail with
    /// [`LimiterError::Closed`]; requests already in flight finish their
    /// current attempt.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}
