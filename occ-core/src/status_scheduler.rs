//! Status Scheduler (`# 4.H`): a periodic worker that applies configured
//! auto-open/auto-close wall-clock windows to the space status on
//! weekdays. Independent of the sweeper; shares only the `Engine` handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveTime, Timelike, Weekday};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::admission::Engine;
use crate::model::SpaceStatusKind;

#[derive(Debug, Clone, Copy)]
pub struct StatusSchedulerConfig {
    pub interval: Duration,
}

impl StatusSchedulerConfig {
    pub const DEFAULT: Self = Self { interval: Duration::from_secs(60) };
}

impl Default for StatusSchedulerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn is_weekday(weekday: Weekday) -> bool {
    !matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// True once the wall clock has reached or passed `boundary` today and the
/// current status doesn't already reflect `target`. Crossing detection is
/// boundary-vs-now rather than edge-triggered, matching `# 4.H`'s
/// description ("crosses the boundary") under a coarse 60s tick.
fn crossed(now_time: NaiveTime, boundary: NaiveTime, tick: Duration) -> bool {
    let tick_secs = tick.as_secs() as i64;
    let now_secs = now_time.num_seconds_from_midnight() as i64;
    let boundary_secs = boundary.num_seconds_from_midnight() as i64;
    now_secs >= boundary_secs && now_secs < boundary_secs + tick_secs.max(1)
}

pub async fn run(engine: Arc<Engine>, config: StatusSchedulerConfig, cancel: CancellationToken) {
    scopeguard::defer! {
        tracing::info!("status scheduler task finishing");
    };

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
                tracing::info!("status scheduler shutting down");
                return;
            }
            _ = ticker.tick() => {
                tick_once(&engine, config.interval).await;
            }
        }
    }
}

async fn tick_once(engine: &Engine, tick: Duration) {
    let status = engine.get_status().await;
    if !status.auto_schedule_enabled {
        return;
    }

    let now = engine.now();
    if !is_weekday(now.weekday()) {
        return;
    }
    let now_time = now.time();

    if let Some(open_at) = status.auto_open {
        if status.status != SpaceStatusKind::Open && crossed(now_time, open_at, tick) {
            match engine
                .set_status("open", None, status.auto_open, status.auto_close, true, Some("auto-schedule".into()))
                .await
            {
                Ok(_) => tracing::info!("status scheduler opened the space"),
                Err(err) => tracing::warn!(error = %err, "status scheduler failed to open the space"),
            }
            return;
        }
    }
    if let Some(close_at) = status.auto_close {
        if status.status == SpaceStatusKind::Open && crossed(now_time, close_at, tick) {
            match engine
                .set_status(
                    "closed",
                    Some("auto-closed".into()),
                    status.auto_open,
                    status.auto_close,
                    true,
                    Some("auto-schedule".into()),
                )
                .await
            {
                Ok(_) => tracing::info!("status scheduler closed the space"),
                Err(err) => tracing::warn!(error = %err, "status scheduler failed to close the space"),
            }
        }
    }
}
