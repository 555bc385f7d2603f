//! The single processing loop behind a [`RateLimiter`](super::RateLimiter).

use super::{Command, LimiterUpdate};
use crate::classifier::EndpointTable;
use crate::config::LimiterConfig;
use crate::gate::{InFlight, PacingGate};
use crate::queue::{QueuedRequest, RequestQueue};
use crate::retry::{self, BackoffPolicy, Settlement};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Point-in-time limiter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Requests waiting in the queue
    pub queued: usize,
    /// Requests dispatched and not yet settled
    pub in_flight: usize,
    /// Dispatches, counting each retry attempt
    pub dispatched: u64,
    /// Throttled attempts that were rescheduled
    pub retried: u64,
    pub resolved: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    queued: AtomicUsize,
    dispatched: AtomicU64,
    retried: AtomicU64,
    resolved: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    pub(super) fn snapshot(&self, in_flight: usize) -> LimiterStats {
        LimiterStats {
            queued: self.queued.load(Ordering::SeqCst),
            in_flight,
            dispatched: self.dispatched.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            resolved: self.resolved.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
        }
    }

    fn record(&self, settlement: &Settlement) {
        let counter = match settlement {
            Settlement::Resolved => &self.resolved,
            Settlement::Rejected => &self.rejected,
            Settlement::Retry { .. } => &self.retried,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

pub(super) struct Scheduler {
    rx: mpsc::UnboundedReceiver<Command>,
    /// Handed to executors so throttled requests can come back.
    requeue_tx: mpsc::UnboundedSender<Command>,
    queue: RequestQueue,
    gate: PacingGate,
    endpoints: EndpointTable,
    max_concurrent: usize,
    poll_interval: Duration,
    base_retry_delay: Duration,
    backoff: BackoffPolicy,
    in_flight: InFlight,
    counters: Arc<Counters>,
}

impl Scheduler {
    pub(super) fn new(
        config: &LimiterConfig,
        endpoints: EndpointTable,
        rx: mpsc::UnboundedReceiver<Command>,
        requeue_tx: mpsc::UnboundedSender<Command>,
        in_flight: InFlight,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            rx,
            requeue_tx,
            queue: RequestQueue::new(),
            gate: PacingGate::new(config.requests_per_second),
            endpoints,
            max_concurrent: config.max_concurrent_requests.max(1),
            poll_interval: config.poll_interval().max(Duration::from_millis(1)),
            base_retry_delay: config.base_retry_delay(),
            backoff: BackoffPolicy::new(config.max_jitter()),
            in_flight,
            counters,
        }
    }

    pub(super) fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel_token))
    }

    async fn run(mut self, cancel_token: CancellationToken) {
        tracing::info!(
            max_concurrent = self.max_concurrent,
            min_interval_ms = self.gate.min_interval().as_millis() as u64,
            "Rate limiter scheduler started"
        );

        loop {
            // Take in everything already sent so the head reflects the
            // latest arrivals before a dispatch decision.
            while let Ok(command) = self.rx.try_recv() {
                self.handle(command);
            }

            let pause = if self.queue.is_empty() {
                None
            } else if self.in_flight.is_saturated(self.max_concurrent) {
                Some(self.poll_interval)
            } else {
                let wait = self.gate.remaining(Instant::now());
                if wait.is_zero() {
                    self.dispatch();
                    continue;
                }
                Some(wait)
            };

            // Park until a command arrives, the pause elapses, or shutdown.
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sleep_for(pause) => {}
            }
        }

        let abandoned = self.queue.clear();
        self.counters.queued.store(0, Ordering::SeqCst);
        tracing::info!(abandoned, "Rate limiter scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { endpoint, call } => {
                let tier = self.endpoints.classify(&endpoint);
                let request = QueuedRequest::new(endpoint, tier, self.base_retry_delay, call);
                tracing::debug!(
                    request_id = %request.id,
                    endpoint = %request.endpoint,
                    priority = request.priority,
                    max_retries = request.max_retries,
                    "Request queued"
                );
                self.queue.push(request);
            }
            Command::Requeue(request) => {
                tracing::debug!(
                    request_id = %request.id,
                    endpoint = %request.endpoint,
                    retry = request.retry_count,
                    "Request requeued at head"
                );
                self.queue.push_front(request);
            }
            Command::Configure(update) => self.apply(update),
        }
        self.counters
            .queued
            .store(self.queue.len(), Ordering::SeqCst);
    }

    fn apply(&mut self, update: LimiterUpdate) {
        if let Some(max) = update.max_concurrent_requests {
            self.max_concurrent = max.max(1);
        }
        if let Some(rate) = update.requests_per_second {
            self.gate.set_rate(rate);
        }
        if let Some(tiers) = update.endpoint_configs {
            self.endpoints.merge(tiers);
        }
        tracing::info!(
            max_concurrent = self.max_concurrent,
            min_interval_ms = self.gate.min_interval().as_millis() as u64,
            endpoint_tiers = self.endpoints.len(),
            "Rate limiter reconfigured"
        );
    }

    fn dispatch(&mut self) {
        let Some(request) = self.queue.pop_front() else {
            return;
        };
        self.counters
            .queued
            .store(self.queue.len(), Ordering::SeqCst);

        let guard = self.in_flight.acquire();
        self.gate.record_dispatch(Instant::now());
        self.counters.dispatched.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            request_id = %request.id,
            endpoint = %request.endpoint,
            priority = request.priority,
            attempt = request.retry_count + 1,
            in_flight = self.in_flight.current(),
            "Dispatching request"
        );

        let backoff = self.backoff.clone();
        let requeue_tx = self.requeue_tx.clone();
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let settlement = retry::execute(request, &backoff, guard).await;
            counters.record(&settlement);
            if let Settlement::Retry { request, guard } = settlement {
                if requeue_tx.send(Command::Requeue(request)).is_err() {
                    tracing::debug!("Scheduler stopped, dropping throttled request");
                }
                drop(guard);
            }
        });
    }
}

async fn sleep_for(pause: Option<Duration>) {
    match pause {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
