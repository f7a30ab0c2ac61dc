//! End-to-end behaviour of the reservoir: admission, blocking, refill,
//! cancellation and idle teardown.

use std::time::Duration;

use futures::future::join_all;
use reservoir_limiter::{CancelReason, Cancellation, LimitError, Reservoir};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const PERIOD: Duration = Duration::from_millis(50);

#[tokio::test(start_paused = true)]
async fn test_capacity_one_cancel_then_refill() {
    let reservoir = Reservoir::new(1, PERIOD).unwrap();
    let start = Instant::now();

    // Call 1: reservoir starts full
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(1));

    // Call 2: blocks, cancelled after 10ms
    let token = CancellationToken::new();
    let waiter = {
        let reservoir = reservoir.clone();
        let token = token.clone();
        tokio::spawn(async move { reservoir.limit_with_token(&token).await })
    };
    sleep(Duration::from_millis(10)).await;
    token.cancel();
    assert_eq!(
        waiter.await.unwrap(),
        Err(LimitError::Cancelled(CancelReason::Cancelled))
    );

    // Call 3 at t=60ms: one refill cycle has passed
    sleep(Duration::from_millis(50)).await;
    let issued = Instant::now();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    assert!(issued.elapsed() < Duration::from_millis(1));

    let stats = reservoir.stats();
    assert_eq!(stats.admitted, 2);
    assert_eq!(stats.cancelled, 1);
    // The first manager went idle at t=50ms, call 3 started a new one
    assert_eq!(stats.managers_started, 2);
}

#[tokio::test(start_paused = true)]
async fn test_capacity_three_admits_three_concurrently() {
    let reservoir = Reservoir::new(3, Duration::from_secs(1)).unwrap();
    let start = Instant::now();

    let results =
        join_all((0..3).map(|_| reservoir.limit_timeout(Duration::from_millis(5)))).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(start.elapsed() < Duration::from_millis(1));

    // The fourth caller blocks
    let cancel = CancellationToken::new();
    let fourth = {
        let reservoir = reservoir.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { reservoir.limit_with_token(&cancel).await })
    };
    sleep(Duration::from_millis(500)).await;
    assert!(!fourth.is_finished());
    assert_eq!(reservoir.participants(), 2);

    cancel.cancel();
    assert!(fourth.await.unwrap().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_blocked_caller_admitted_by_refill() {
    let reservoir = Reservoir::new(1, PERIOD).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();

    let start = Instant::now();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    let waited = start.elapsed();

    assert!(waited >= PERIOD);
    assert!(waited < PERIOD * 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_request_does_not_consume_token() {
    let reservoir = Reservoir::new(1, PERIOD).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();

    // Gives up before the refill
    let err = reservoir
        .limit_timeout(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, LimitError::Cancelled(_)));

    // Already waiting when the refill lands at t=50ms, so it must be served
    // by that refill rather than a later one
    let start = Instant::now();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    assert!(start.elapsed() <= Duration::from_millis(40));

    let stats = reservoir.stats();
    assert_eq!(stats.stale_waiters, 1);
    assert_eq!(stats.refills, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiters_do_not_outlive_idle_teardown() {
    let reservoir = Reservoir::new(1, Duration::from_secs(3600)).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();

    for _ in 0..1000 {
        let err = reservoir
            .limit_timeout(Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LimitError::Cancelled(_)));
    }
    // Discarded while the reservoir is still empty, not piled up
    assert!(reservoir.stats().stale_waiters >= 999);

    reservoir.join_manager().await;
    let stats = reservoir.stats();
    assert!(!reservoir.is_active());
    assert_eq!(stats.stale_waiters, 1000);
    assert_eq!(stats.cancelled, 1000);

    // A fresh manager finds nothing left over
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(reservoir.stats().stale_waiters, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_refills_to_full_then_goes_idle() {
    let reservoir = Reservoir::new(2, PERIOD).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    assert_eq!(reservoir.available(), 1);
    assert!(reservoir.is_active());

    sleep(PERIOD + Duration::from_millis(1)).await;

    assert_eq!(reservoir.available(), 2);
    assert!(!reservoir.is_active());
    assert_eq!(reservoir.participants(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_never_overfills() {
    let reservoir = Reservoir::new(3, PERIOD).unwrap();
    for _ in 0..3 {
        reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    }
    assert_eq!(reservoir.available(), 0);

    // Well past the time needed to refill everything
    sleep(PERIOD * 10).await;

    let stats = reservoir.stats();
    assert_eq!(stats.available, 3);
    assert_eq!(stats.refills, 3);
    assert!(!stats.manager_running);
}

#[tokio::test(start_paused = true)]
async fn test_idle_teardown_releases_tasks() {
    let reservoir = Reservoir::new(2, PERIOD).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();

    reservoir.join_manager().await;
    assert!(!reservoir.is_active());

    // The last scheduler retires on its first tick after the reservoir fills
    sleep(PERIOD + Duration::from_millis(1)).await;
    let stats = reservoir.stats();
    assert_eq!(stats.schedulers_spawned, 1);
    assert_eq!(stats.active_schedulers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_begins_at_full_capacity() {
    let reservoir = Reservoir::new(2, PERIOD).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    reservoir.join_manager().await;

    let start = Instant::now();
    for _ in 0..2 {
        reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(1));
    assert_eq!(reservoir.stats().managers_started, 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_context() {
    let reservoir = Reservoir::new(1, Duration::from_secs(10)).unwrap();
    reservoir.limit_timeout(Duration::from_secs(1)).await.unwrap();

    let cx = Cancellation::new().with_timeout(Duration::from_millis(20));
    let start = Instant::now();
    let err = reservoir.limit_with(&cx).await.unwrap_err();

    assert_eq!(err.reason(), Some(&CancelReason::DeadlineExceeded));
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[tokio::test(start_paused = true)]
async fn test_waiters_drain_one_per_period() {
    let reservoir = Reservoir::new(2, PERIOD).unwrap();
    let start = Instant::now();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let reservoir = reservoir.clone();
            tokio::spawn(async move {
                reservoir.limit_timeout(Duration::from_secs(5)).await?;
                Ok::<_, LimitError>(start.elapsed())
            })
        })
        .collect();

    let mut waits = Vec::new();
    for handle in handles {
        waits.push(handle.await.unwrap().unwrap());
    }
    waits.sort();

    // Two from the full reservoir, then one per refill from the single scheduler
    assert!(waits[1] < Duration::from_millis(1));
    for (i, waited) in waits.iter().enumerate().skip(2) {
        let refills = (i - 1) as u32;
        assert!(*waited >= PERIOD * refills, "caller {i} admitted after {waited:?}");
    }
}

/// Many callers on a multi-threaded runtime. Every caller must eventually be
/// admitted and the reservoir must settle back to full; dropped refills are
/// surfaced through the stats.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_heavy_concurrent_load() {
    const CAPACITY: usize = 8;
    const CALLERS: usize = 100;

    let reservoir = Reservoir::new(CAPACITY, Duration::from_millis(5)).unwrap();
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let reservoir = reservoir.clone();
            tokio::spawn(async move { reservoir.limit_timeout(Duration::from_secs(30)).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    reservoir.join_manager().await;

    let stats = reservoir.stats();
    assert_eq!(stats.admitted, CALLERS as u64);
    assert_eq!(stats.available, CAPACITY);
    assert!(!stats.manager_running);
    // Every admission is backed by an initial token or a refill
    assert!(
        stats.admitted <= CAPACITY as u64 * stats.managers_started + stats.refills,
        "admissions not backed by tokens: {stats:?}"
    );
    assert!(stats.refills_dropped <= stats.schedulers_retired);
}
