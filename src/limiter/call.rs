//! Typed call bound to its caller's reply channel.

use super::LimiterError;
use crate::retry::{Attempt, PendingCall, ThrottleSignal};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;

pub(super) type Reply<T, E> = oneshot::Sender<Result<T, LimiterError<E>>>;

pub(super) struct TypedCall<F, T, E> {
    thunk: F,
    reply: Reply<T, E>,
    outcome: Option<Result<T, LimiterError<E>>>,
}

impl<F, T, E> TypedCall<F, T, E> {
    pub(super) fn new(thunk: F, reply: Reply<T, E>) -> Self {
        Self {
            thunk,
            reply,
            outcome: None,
        }
    }
}

#[async_trait]
impl<F, Fut, T, E> PendingCall for TypedCall<F, T, E>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: ThrottleSignal + Send + 'static,
{
    async fn attempt(&mut self, final_attempt: bool) -> Attempt {
        // A panic in the thunk or its future ends this call, not the limiter.
        let thunk = &mut self.thunk;
        let result = AssertUnwindSafe(async move { thunk().await })
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(value)) => {
                self.outcome = Some(Ok(value));
                Attempt::Resolved
            }
            Ok(Err(err)) if err.is_throttled() && !final_attempt => Attempt::Throttled {
                retry_after: err.retry_after(),
            },
            Ok(Err(err)) => {
                self.outcome = Some(Err(LimiterError::Request(err)));
                Attempt::Rejected
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(panic = %message, "Call panicked");
                self.outcome = Some(Err(LimiterError::Panicked(message)));
                Attempt::Rejected
            }
        }
    }

    fn settle(self: Box<Self>) {
        let TypedCall { reply, outcome, .. } = *self;
        // No outcome means the call never reached a terminal attempt; dropping
        // the sender tells the caller the limiter gave up on it.
        if let Some(outcome) = outcome {
            if reply.send(outcome).is_err() {
                tracing::trace!("Caller stopped waiting before the result arrived");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
