//! Property tests over random sequences of scans (`# 8`, P1/P2/P6):
//! invariants I1-I4 must hold after every `handle_scan` call, regardless of
//! the order in which a small pool of occupants scan in and out.

use std::sync::Arc;

use occ_core::admission::Engine;
use occ_core::directory::StaticDirectory;
use occ_core::facade::Facade;
use occ_core::forecaster::{Forecaster, ForecasterConfig};
use occ_core::notifications::NotificationHub;
use occ_core::persistence::InMemoryStore;
use occ_core::ranker::{RankerConstants, RankerWeights};
use occ_utils::{ManualClock, OccupantId};
use proptest::prelude::*;

const POOL_SIZE: usize = 4;
const MAX_CAPACITY: u32 = 3;

async fn build() -> (Facade, Vec<&'static str>, ManualClock) {
    let tokens: Vec<&'static str> = vec!["a", "b", "c", "d"];
    let mut dir = StaticDirectory::new();
    for token in &tokens {
        dir.register(*token, OccupantId::new());
    }
    let clock = ManualClock::new("2026-01-01T00:00:00Z".parse().unwrap());

    let engine = Engine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(dir),
        Arc::new(NotificationHub::new()),
        Arc::new(Forecaster::new(ForecasterConfig::DEFAULT, MAX_CAPACITY as i64)),
        Arc::new(clock.clone()),
        Arc::new(occ_core::http::HealthState::new(std::time::Duration::from_secs(30))),
        RankerWeights::DEFAULT,
        RankerConstants::DEFAULT,
        chrono::Duration::hours(1),
        MAX_CAPACITY,
    )
    .await
    .unwrap();

    (Facade::new(Arc::new(engine)), tokens, clock)
}

/// Checks I1 (`current_occupancy == |open sessions|`) and I3
/// (`0 <= current_occupancy <= max_capacity`) against the facade's two
/// independent views of the same state.
async fn assert_invariants_hold(facade: &Facade) {
    let view = facade.get_occupancy().await;
    assert!((0..=view.max).contains(&view.count), "I3 violated: count={} max={}", view.count, view.max);

    let open_sessions = facade.list_scored().await.len() as i64;
    assert_eq!(view.count, open_sessions, "I1 violated: counter and registry disagree");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// P1/P2: after any sequence of `handle_scan` calls (admits, voluntary
    /// exits, and capacity-triggered evictions all mixed together on a pool
    /// smaller than `max_capacity + 1`), the occupancy invariants hold.
    #[test]
    fn p1_p2_invariants_hold_after_random_scan_sequences(
        picks in proptest::collection::vec(0usize..POOL_SIZE, 1..40),
        advance_minutes in proptest::collection::vec(0i64..5, 1..40),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (facade, tokens, clock) = build().await;

            for (pick, minutes) in picks.iter().zip(advance_minutes.iter().cycle()) {
                clock.advance(chrono::Duration::minutes(*minutes));
                let token = tokens[*pick % tokens.len()];
                // errors (RejectedClosed, RejectedFullAndUnremovable, ...)
                // are expected outcomes, not invariant violations.
                let _ = facade.scan(token).await;
                assert_invariants_hold(&facade).await;
            }
        });
    }

    /// P6: every occupant who enters and later exits (voluntarily or via a
    /// sweep) returns the counter to its pre-entry value, modulo other
    /// concurrent activity from the rest of the pool.
    #[test]
    fn p6_solo_round_trip_returns_counter_to_baseline(
        idle_minutes in 1i64..120,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let (facade, tokens, clock) = build().await;
            let baseline = facade.get_occupancy().await.count;

            facade.scan(tokens[0]).await.unwrap();
            clock.advance(chrono::Duration::minutes(idle_minutes));

            if idle_minutes >= 60 {
                // deadline elapsed: sweep synthesizes the EXIT instead of a
                // voluntary scan.
                facade.run_maintenance_sweep().await;
            } else {
                facade.scan(tokens[0]).await.unwrap();
            }

            let after = facade.get_occupancy().await.count;
            assert_eq!(after, baseline, "P6 violated: counter did not return to baseline");
        });
    }
}
