//! Integration tests for the request governor
//!
//! Timing tests run on a paused clock, so backoff and pacing waits are
//! observed in virtual time.

mod common;

use common::{fast_config, no_jitter_config, wait_until, Recorder, TestError};
use pacer::config::LimiterConfig;
use pacer::limiter::ConfigureError;
use pacer::{EndpointTable, EndpointTier, LimiterError, LimiterUpdate, RateLimiter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test(start_paused = true)]
async fn higher_priority_endpoint_dispatches_first() {
    let limiter = RateLimiter::new(no_jitter_config(1), EndpointTable::default());
    let recorder = Recorder::new();

    let (analytics, users) = tokio::join!(
        limiter.enqueue("/analytics/daily", recorder.thunk("/analytics")),
        limiter.enqueue("/users/42", recorder.thunk("/users")),
    );

    assert_eq!(analytics.unwrap(), "/analytics");
    assert_eq!(users.unwrap(), "/users");
    assert_eq!(recorder.labels(), vec!["/users", "/analytics"]);
}

#[tokio::test(start_paused = true)]
async fn late_high_priority_arrival_overtakes_waiting_request() {
    let limiter = RateLimiter::new(no_jitter_config(3), EndpointTable::default());
    let recorder = Recorder::new();

    let spawn_call = |endpoint: &'static str, label: &'static str| {
        let limiter = limiter.clone();
        let thunk = recorder.thunk(label);
        tokio::spawn(async move { limiter.enqueue(endpoint, thunk).await })
    };

    // "a" takes the first slot; "b" then waits out the 200ms pacing interval
    // and "c" arrives during that wait.
    let a = spawn_call("/analytics/a", "a");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let b = spawn_call("/analytics/b", "b");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let c = spawn_call("/users/c", "c");

    for handle in [a, b, c] {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(recorder.labels(), vec!["a", "c", "b"]);
}

#[tokio::test(start_paused = true)]
async fn equal_priority_keeps_arrival_order() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    let recorder = Recorder::new();

    let (first, second, third) = tokio::join!(
        limiter.enqueue("/leads/1", recorder.thunk("first")),
        limiter.enqueue("/leads/2", recorder.thunk("second")),
        limiter.enqueue("/leads/3", recorder.thunk("third")),
    );

    assert!(first.is_ok() && second.is_ok() && third.is_ok());
    assert_eq!(recorder.labels(), vec!["first", "second", "third"]);
}

#[tokio::test(start_paused = true)]
async fn throttled_request_is_retried_before_waiting_peers() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    let recorder = Recorder::new();

    let (flaky, steady) = tokio::join!(
        limiter.enqueue("/analytics/a", recorder.flaky_thunk("a", 1, None)),
        limiter.enqueue("/analytics/b", recorder.thunk("b")),
    );

    assert_eq!(flaky.unwrap(), 2);
    assert_eq!(steady.unwrap(), "b");
    assert_eq!(recorder.labels(), vec!["a", "a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn configured_tier_changes_priority() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    limiter
        .configure(LimiterUpdate::new().endpoint("/reports", EndpointTier::new(20, 0)))
        .unwrap();
    let recorder = Recorder::new();

    let (auth, reports) = tokio::join!(
        limiter.enqueue("/auth/token", recorder.thunk("/auth")),
        limiter.enqueue("/reports/q3", recorder.thunk("/reports")),
    );

    assert!(auth.is_ok() && reports.is_ok());
    assert_eq!(recorder.labels(), vec!["/reports", "/auth"]);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn throttled_call_is_retried_with_growing_waits() {
    // Default tier: two retries, three invocations in total.
    let limiter = RateLimiter::new(LimiterConfig::default(), EndpointTable::default());
    let recorder = Recorder::new();

    let err = limiter
        .enqueue("/reports", recorder.flaky_thunk("/reports", u32::MAX, None))
        .await
        .unwrap_err();

    assert_eq!(recorder.count(), 3);
    assert_eq!(
        err.into_request(),
        Some(TestError::Throttled {
            attempt: 3,
            retry_after: None
        })
    );

    let gaps = recorder.gaps();
    assert!(gaps[0] >= Duration::from_millis(1000), "first wait {:?}", gaps[0]);
    assert!(gaps[0] < Duration::from_millis(2000), "first wait {:?}", gaps[0]);
    assert!(gaps[1] >= Duration::from_millis(2000), "second wait {:?}", gaps[1]);
    assert!(gaps[1] > gaps[0]);
}

#[tokio::test(start_paused = true)]
async fn throttled_call_resolves_on_later_attempt() {
    let limiter = RateLimiter::new(no_jitter_config(3), EndpointTable::default());
    let recorder = Recorder::new();

    let value = limiter
        .enqueue("/reports", recorder.flaky_thunk("/reports", 2, None))
        .await
        .unwrap();

    assert_eq!(value, 3);
    let gaps = recorder.gaps();
    assert!(gaps[0] >= Duration::from_millis(1000) && gaps[0] < Duration::from_millis(1050));
    assert!(gaps[1] >= Duration::from_millis(2000) && gaps[1] < Duration::from_millis(2050));
    assert_eq!(limiter.stats().retried, 2);
    assert_eq!(limiter.stats().resolved, 1);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_follows_endpoint_tier() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    let recorder = Recorder::new();

    // "/stores" allows three retries, "/auth" only one.
    let stores = limiter
        .enqueue("/stores/9", recorder.flaky_thunk("/stores", u32::MAX, None))
        .await;
    assert!(stores.is_err());
    assert_eq!(recorder.count(), 4);

    let recorder = Recorder::new();
    let auth = limiter
        .enqueue("/auth/login", recorder.flaky_thunk("/auth", u32::MAX, None))
        .await;
    assert!(auth.is_err());
    assert_eq!(recorder.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_retry_tier_rejects_first_throttle() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    limiter
        .configure(LimiterUpdate::new().endpoint("/orders", EndpointTier::new(9, 0)))
        .unwrap();
    let recorder = Recorder::new();

    let err = limiter
        .enqueue("/orders/1", recorder.flaky_thunk("/orders", 1, None))
        .await
        .unwrap_err();

    assert_eq!(recorder.count(), 1);
    assert!(matches!(
        err,
        LimiterError::Request(TestError::Throttled { attempt: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn server_retry_after_is_honoured() {
    let limiter = RateLimiter::new(no_jitter_config(1), EndpointTable::default());
    let recorder = Recorder::new();

    let value = limiter
        .enqueue(
            "/users",
            recorder.flaky_thunk("/users", 1, Some(Duration::from_secs(5))),
        )
        .await
        .unwrap();

    assert_eq!(value, 2);
    let gaps = recorder.gaps();
    assert!(gaps[0] >= Duration::from_secs(5));
    assert!(gaps[0] < Duration::from_millis(5100));
}

#[tokio::test(start_paused = true)]
async fn non_throttling_failure_is_not_retried() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let err = limiter
        .enqueue("/users", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::Failed(500)) }
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.to_string(), "HTTP 500");
    assert_eq!(err.into_request(), Some(TestError::Failed(500)));
}

#[tokio::test(start_paused = true)]
async fn panicking_call_fails_alone() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());

    let err = limiter
        .enqueue("/users", || async {
            if true {
                panic!("boom");
            }
            Ok::<u32, TestError>(0)
        })
        .await
        .unwrap_err();

    assert!(!err.is_closed());
    assert!(matches!(err, LimiterError::Panicked(ref message) if message == "boom"));
    assert!(!limiter.is_shut_down());
    assert_eq!(limiter.in_flight(), 0);

    let value = limiter
        .enqueue("/users", || async { Ok::<_, TestError>(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);
}

// =============================================================================
// Pacing and concurrency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn configured_rate_spaces_dispatches() {
    let limiter = RateLimiter::new(no_jitter_config(3), EndpointTable::default());
    limiter
        .configure(LimiterUpdate::new().requests_per_second(1.0))
        .unwrap();
    let recorder = Recorder::new();

    let (first, second) = tokio::join!(
        limiter.enqueue("/users/1", recorder.thunk("1")),
        limiter.enqueue("/users/2", recorder.thunk("2")),
    );

    assert!(first.is_ok() && second.is_ok());
    let gaps = recorder.gaps();
    assert!(gaps[0] >= Duration::from_millis(1000), "gap {:?}", gaps[0]);
    assert!(gaps[0] < Duration::from_millis(1100), "gap {:?}", gaps[0]);
}

#[tokio::test(start_paused = true)]
async fn default_rate_spaces_dispatches_by_200ms() {
    let limiter = RateLimiter::new(no_jitter_config(3), EndpointTable::default());
    let recorder = Recorder::new();

    let (a, b, c) = tokio::join!(
        limiter.enqueue("/leads", recorder.thunk("a")),
        limiter.enqueue("/leads", recorder.thunk("b")),
        limiter.enqueue("/leads", recorder.thunk("c")),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    for gap in recorder.gaps() {
        assert!(gap >= Duration::from_millis(200), "gap {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn in_flight_never_exceeds_ceiling() {
    let limiter = RateLimiter::new(fast_config(2), EndpointTable::default());
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls = (0..8).map(|i| {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let observer = limiter.clone();
        limiter.enqueue(format!("/leads/{}", i), move || {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let observed = observer.in_flight();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now.max(observed), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, TestError>(i)
            }
        })
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn raising_ceiling_admits_more_requests() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    limiter
        .configure(LimiterUpdate::new().max_concurrent_requests(4))
        .unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls = (0..4).map(|i| {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        limiter.enqueue("/calendar", move || {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, TestError>(i)
            }
        })
    });
    futures::future::join_all(calls).await;

    assert_eq!(peak.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn in_flight_is_released_before_caller_resumes() {
    let limiter = RateLimiter::new(fast_config(2), EndpointTable::default());

    limiter
        .enqueue("/users", || async { Ok::<_, TestError>(()) })
        .await
        .unwrap();
    assert_eq!(limiter.in_flight(), 0);

    let _ = limiter
        .enqueue("/users", || async { Err::<(), _>(TestError::Failed(400)) })
        .await;
    assert_eq!(limiter.in_flight(), 0);

    let _ = limiter
        .enqueue("/auth", || async {
            Err::<(), _>(TestError::Throttled {
                attempt: 0,
                retry_after: None,
            })
        })
        .await;
    assert_eq!(limiter.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn stats_track_outcomes() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    let recorder = Recorder::new();

    let _ = limiter
        .enqueue("/reports", recorder.flaky_thunk("x", u32::MAX, None))
        .await;
    let _ = limiter
        .enqueue("/reports", recorder.flaky_thunk("y", 0, None))
        .await;

    assert!(
        wait_until(Duration::from_secs(1), || limiter.stats().resolved == 1).await,
        "stats never settled: {:?}",
        limiter.stats()
    );
    let stats = limiter.stats();
    assert_eq!(stats.dispatched, 4);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.in_flight, 0);
}

// =============================================================================
// Configuration and shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn configure_merges_endpoint_tiers() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());
    limiter
        .configure(LimiterUpdate::new().endpoint("/users", EndpointTier::new(8, 0)))
        .unwrap();

    // "/users" lost its retries; "/leads" keeps its builtin three.
    let users = Recorder::new();
    let _ = limiter
        .enqueue("/users", users.flaky_thunk("u", u32::MAX, None))
        .await;
    assert_eq!(users.count(), 1);

    let leads = Recorder::new();
    let _ = limiter
        .enqueue("/leads", leads.flaky_thunk("l", u32::MAX, None))
        .await;
    assert_eq!(leads.count(), 4);
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_is_rejected() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());

    let err = limiter
        .configure(LimiterUpdate::new().requests_per_second(-1.0))
        .unwrap_err();
    assert!(matches!(err, ConfigureError::Invalid(_)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_fails_queued_requests() {
    let limiter = RateLimiter::new(fast_config(1), EndpointTable::default());

    let slow = {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            limiter
                .enqueue("/auth", || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, TestError>("done")
                })
                .await
        })
    };
    let queued: Vec<_> = (0..2)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .enqueue("/analytics", || async { Ok::<_, TestError>("never") })
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(limiter.in_flight(), 1);
    limiter.shutdown();

    for handle in queued {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_closed());
    }
    // The call already in flight finishes its attempt.
    assert_eq!(slow.await.unwrap().unwrap(), "done");

    let late = limiter
        .enqueue("/users", || async { Ok::<_, TestError>(()) })
        .await;
    assert!(matches!(late, Err(LimiterError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn limiters_are_independent() {
    let slow = RateLimiter::new(no_jitter_config(1), EndpointTable::default());
    slow.configure(LimiterUpdate::new().requests_per_second(0.5))
        .unwrap();
    let fast = RateLimiter::new(fast_config(4), EndpointTable::default());

    let recorder = Recorder::new();
    let (a, b) = tokio::join!(
        fast.enqueue("/users", recorder.thunk("a")),
        fast.enqueue("/users", recorder.thunk("b")),
    );
    assert!(a.is_ok() && b.is_ok());
    assert!(recorder.gaps()[0] < Duration::from_millis(10));
    assert_eq!(slow.stats().dispatched, 0);
}
