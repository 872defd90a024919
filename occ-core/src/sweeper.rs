//! Auto-Exit Sweeper (`# 4.E`): a periodic background worker that forces
//! EXIT events for sessions whose deadline elapsed without a voluntary
//! scan. All the actual state mutation lives in `admission::Engine::sweep_once`
//! — this module only owns the tick loop and its shutdown handling, in the
//! teacher's periodic-task shape (`disk_usage_eviction_task`'s `Iteration`
//! loop around `tokio::time::timeout_at` + a `CancellationToken`).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::admission::Engine;

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
}

impl SweeperConfig {
    pub const DEFAULT: Self = Self { interval: Duration::from_secs(60) };
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs until `cancel` is triggered, stopping at the next tick boundary
/// (`# 5`: "in-flight operations complete before shutdown returns").
pub async fn run(engine: Arc<Engine>, config: SweeperConfig, cancel: CancellationToken) {
    scopeguard::defer! {
        tracing::info!("sweeper task finishing");
    };

    // jittered startup delay so the sweeper and status scheduler don't tick
    // in lockstep across a fleet of processes started at the same instant,
    // matching the teacher's `random_init_delay` before periodic tasks.
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..config.interval.as_millis().max(1) as u64));
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(jitter) => {}
    }

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {
                let closed = engine.sweep_once().await;
                if !closed.is_empty() {
                    tracing::info!(count = closed.len(), "sweeper closed expired sessions");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::forecaster::{Forecaster, ForecasterConfig};
    use crate::notifications::NotificationHub;
    use crate::ranker::{RankerConstants, RankerWeights};
    use crate::persistence::InMemoryStore;
    use occ_utils::{ManualClock, OccupantId};

    async fn engine_with_one_session() -> (Arc<Engine>, OccupantId, ManualClock) {
        let mut dir = StaticDirectory::new();
        let occupant_id = OccupantId::new();
        dir.register("token-a", occupant_id);
        let clock = ManualClock::new("2026-01-01T00:00:00Z".parse().unwrap());

        let engine = Engine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(dir),
            Arc::new(NotificationHub::new()),
            Arc::new(Forecaster::new(ForecasterConfig::DEFAULT, 10)),
            Arc::new(clock.clone()),
            Arc::new(crate::http::HealthState::new(std::time::Duration::from_secs(30))),
            RankerWeights::DEFAULT,
            RankerConstants::DEFAULT,
            chrono::Duration::hours(1),
            10,
        )
        .await
        .unwrap();
        engine.handle_scan("token-a").await.unwrap();

        (Arc::new(engine), occupant_id, clock)
    }

    #[tokio::test]
    async fn sweep_closes_expired_sessions_and_is_idempotent() {
        let (engine, _id, clock) = engine_with_one_session().await;
        clock.advance(chrono::Duration::hours(2));

        let closed_first = engine.sweep_once().await;
        assert_eq!(closed_first.len(), 1);
        assert_eq!(engine.get_occupancy().0, 0);

        // P7: re-running at the same `now` with nothing left expired is a no-op.
        let closed_second = engine.sweep_once().await;
        assert!(closed_second.is_empty());
    }

    #[tokio::test]
    async fn sweep_is_a_no_op_when_nothing_expired() {
        let (engine, _id, _clock) = engine_with_one_session().await;
        let closed = engine.sweep_once().await;
        assert!(closed.is_empty());
        assert_eq!(engine.get_occupancy().0, 1);
    }
}
