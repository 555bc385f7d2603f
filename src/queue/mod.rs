//! Request queue
//!
//! Priority-ordered queue of calls waiting for dispatch. New requests are
//! appended and the queue is re-sorted by descending priority with a stable
//! sort, so equal priorities keep their arrival order. Throttled requests
//! coming back from the retry path are put at the head instead.

use crate::classifier::EndpointTier;
use crate::retry::PendingCall;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// A call waiting to be dispatched.
pub struct QueuedRequest {
    /// Correlation id for logs
    pub id: Uuid,
    /// Logical endpoint label used for classification
    pub endpoint: String,
    /// Dispatch priority (higher first)
    pub priority: i32,
    /// Throttled attempts retried so far
    pub retry_count: u32,
    /// Retry budget from the endpoint tier
    pub max_retries: u32,
    /// Base backoff delay, doubled per retry
    pub retry_delay: Duration,
    /// When the request first entered the queue
    pub enqueued_at: Instant,
    pub(crate) call: Box<dyn PendingCall>,
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl QueuedRequest {
    /// Build a fresh request for `endpoint` with no retries consumed.
    pub fn new(
        endpoint: impl Into<String>,
        tier: EndpointTier,
        retry_delay: Duration,
        call: Box<dyn PendingCall>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            priority: tier.priority,
            retry_count: 0,
            max_retries: tier.max_retries,
            retry_delay,
            enqueued_at: Instant::now(),
            call,
        }
    }

    /// True when a throttled outcome of the next attempt must be terminal.
    pub fn is_final_attempt(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Deliver whatever outcome the call recorded to the waiting caller.
    pub(crate) fn settle(self) {
        self.call.settle();
    }
}

/// Ordered queue of pending requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and restore descending-priority order (stable on ties).
    pub fn push(&mut self, request: QueuedRequest) {
        self.items.push_back(request);
        self.items
            .make_contiguous()
            .sort_by_key(|r| std::cmp::Reverse(r.priority));
        self.publish_depth();
    }

    /// Put a request at the head without re-sorting.
    pub fn push_front(&mut self, request: QueuedRequest) {
        self.items.push_front(request);
        self.publish_depth();
    }

    /// Take the head of the queue.
    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        let item = self.items.pop_front();
        if item.is_some() {
            self.publish_depth();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Priorities in dispatch order.
    pub fn priorities(&self) -> Vec<i32> {
        self.items.iter().map(|r| r.priority).collect()
    }

    /// Drop every queued request. Their callers observe a closed limiter.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.publish_depth();
        dropped
    }

    fn publish_depth(&self) {
        metrics::gauge!("pacer_queue_depth").set(self.items.len() as f64);
    }
}
