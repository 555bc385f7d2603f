//! Pacing and concurrency gate
//!
//! Two independent ceilings decide when the next request may leave the queue:
//! a minimum spacing between successive dispatches (derived from a
//! requests-per-second rate, process wide rather than per endpoint) and a cap
//! on requests dispatched but not yet settled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Enforces a minimum interval between dispatches.
#[derive(Debug, Clone)]
pub struct PacingGate {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
}

impl PacingGate {
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            min_interval: Self::interval_for(requests_per_second),
            last_dispatch: None,
        }
    }

    /// Spacing implied by a rate. Non-positive or non-finite rates disable pacing.
    pub fn interval_for(requests_per_second: f64) -> Duration {
        if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_nanos((1e9 / requests_per_second).round() as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Time left before the next dispatch may start.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_dispatch {
            Some(last) => (last + self.min_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn record_dispatch(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }

    /// Change the rate; the last dispatch time is kept.
    pub fn set_rate(&mut self, requests_per_second: f64) {
        self.min_interval = Self::interval_for(requests_per_second);
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

/// Shared count of requests currently in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    count: Arc<AtomicUsize>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one request in flight until the returned guard drops.
    pub fn acquire(&self) -> InFlightGuard {
        let current = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("pacer_in_flight").set(current as f64);
        InFlightGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// True when no further request may be dispatched under `max`.
    pub fn is_saturated(&self, max: usize) -> bool {
        self.current() >= max
    }
}

/// Releases one in-flight slot on drop, whatever path the holder exits by.
#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let current = self.count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("pacer_in_flight").set(current as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_from_rate() {
        assert_eq!(PacingGate::interval_for(5.0), Duration::from_millis(200));
        assert_eq!(PacingGate::interval_for(1.0), Duration::from_secs(1));
        assert_eq!(PacingGate::interval_for(0.5), Duration::from_secs(2));
    }

    #[test]
    fn invalid_rate_disables_pacing() {
        assert_eq!(PacingGate::interval_for(0.0), Duration::ZERO);
        assert_eq!(PacingGate::interval_for(-3.0), Duration::ZERO);
        assert_eq!(PacingGate::interval_for(f64::NAN), Duration::ZERO);
        assert_eq!(PacingGate::interval_for(f64::INFINITY), Duration::ZERO);
    }

    #[test]
    fn first_dispatch_never_waits() {
        let gate = PacingGate::new(5.0);
        assert_eq!(gate.remaining(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn remaining_counts_down_from_last_dispatch() {
        let mut gate = PacingGate::new(5.0);
        let start = Instant::now();
        gate.record_dispatch(start);

        assert_eq!(gate.remaining(start), Duration::from_millis(200));
        assert_eq!(
            gate.remaining(start + Duration::from_millis(150)),
            Duration::from_millis(50)
        );
        assert_eq!(
            gate.remaining(start + Duration::from_millis(500)),
            Duration::ZERO
        );
    }

    #[test]
    fn set_rate_applies_to_pending_wait() {
        let mut gate = PacingGate::new(5.0);
        let start = Instant::now();
        gate.record_dispatch(start);
        gate.set_rate(1.0);
        assert_eq!(gate.remaining(start), Duration::from_secs(1));
        assert_eq!(gate.min_interval(), Duration::from_secs(1));
    }

    #[test]
    fn guard_releases_slot_on_drop() {
        let in_flight = InFlight::new();
        let a = in_flight.acquire();
        let b = in_flight.acquire();
        assert_eq!(in_flight.current(), 2);
        assert!(in_flight.is_saturated(2));

        drop(a);
        assert_eq!(in_flight.current(), 1);
        assert!(!in_flight.is_saturated(2));

        drop(b);
        assert_eq!(in_flight.current(), 0);
    }

    #[test]
    fn guard_releases_slot_on_panic() {
        let in_flight = InFlight::new();
        let shared = in_flight.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = shared.acquire();
            panic!("attempt blew up");
        });
        assert!(result.is_err());
        assert_eq!(in_flight.current(), 0);
    }
}
