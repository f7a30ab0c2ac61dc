//! Property-Based Tests for the Reservoir
//!
//! Each case builds its own current-thread runtime with a paused clock so
//! timing is deterministic.

use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

use super::{CancelReason, LimitError, Reservoir};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A full reservoir admits exactly `capacity` callers without waiting
    #[test]
    fn prop_full_reservoir_admits_capacity(
        capacity in 1usize..16,
        period_ms in 10u64..500,
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let reservoir = Reservoir::new(capacity, Duration::from_millis(period_ms)).unwrap();
            let start = Instant::now();

            for _ in 0..capacity {
                let admitted = reservoir.limit_timeout(Duration::from_millis(1)).await;
                prop_assert!(admitted.is_ok());
            }
            prop_assert!(start.elapsed() < Duration::from_millis(1));

            // The next caller has to wait for a refill
            let blocked = reservoir.limit_timeout(Duration::from_millis(period_ms / 2)).await;
            prop_assert_eq!(blocked, Err(LimitError::Cancelled(CancelReason::DeadlineExceeded)));
            Ok(())
        })?;
    }

    /// Whatever is taken, the reservoir settles back at exactly `capacity`
    #[test]
    fn prop_refill_never_overfills(
        capacity in 1usize..8,
        taken in 0usize..8,
        period_ms in 10u64..200,
    ) {
        let taken = taken.min(capacity);
        let rt = paused_runtime();
        rt.block_on(async {
            let reservoir = Reservoir::new(capacity, Duration::from_millis(period_ms)).unwrap();
            for _ in 0..taken {
                reservoir.limit_timeout(Duration::from_millis(1)).await.unwrap();
            }

            reservoir.join_manager().await;

            prop_assert_eq!(reservoir.available(), capacity);
            prop_assert_eq!(reservoir.participants(), 0);
            prop_assert!(!reservoir.is_active());
            Ok(())
        })?;
    }
}
