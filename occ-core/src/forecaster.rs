//! Online Holt-Winters-with-exogenous-regressor occupancy forecaster
//! (`# 4.F`). Owns its own mutex, never held at the same time as the space
//! lock (`# 5`'s ordering rule) — callers push an observation after
//! committing and releasing the space lock.

use std::collections::VecDeque;

use occ_utils::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecasterConfig {
    pub alpha: f64,
    pub gamma: f64,
    pub delta: f64,
    pub eta: f64,
    pub season_length: usize,
    /// Observations needed before outlier clipping switches from the fixed
    /// `[0, max_capacity]` bound to the rolling `mu +/- 3*sigma` bound.
    pub outlier_min_observations: usize,
    /// How many recent observations feed the rolling mu/sigma.
    pub retained_window: usize,
}

impl ForecasterConfig {
    pub const DEFAULT: Self = Self {
        alpha: 0.3,
        gamma: 0.1,
        delta: 0.3,
        eta: 0.01,
        season_length: 60,
        outlier_min_observations: 10,
        retained_window: 500,
    };
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastPoint {
    pub step: u32,
    pub value: i64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub current: i64,
    pub net_rate: f64,
    pub forecasts: Vec<ForecastPoint>,
    pub crowd_status: String,
    pub model_state: ModelStateSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStateSnapshot {
    pub level: f64,
    pub trend: f64,
    pub beta: f64,
}

struct State {
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    beta: f64,
    retained: VecDeque<f64>,
    pending: Option<(i64, f64, f64)>, // (minute bucket, occupancy, net_rate)
    last_x: f64,
    initialized: bool,
}

impl State {
    fn new(season_length: usize) -> Self {
        Self {
            level: 0.0,
            trend: 0.0,
            seasonal: vec![0.0; season_length],
            beta: 0.0,
            retained: VecDeque::new(),
            pending: None,
            last_x: 0.0,
            initialized: false,
        }
    }
}

pub struct Forecaster {
    config: ForecasterConfig,
    max_capacity: std::sync::atomic::AtomicI64,
    state: tokio::sync::Mutex<State>,
}

fn season_index(now: Timestamp, season_length: usize) -> usize {
    let minute_of_hour = now.timestamp().div_euclid(60).rem_euclid(60);
    (minute_of_hour as usize) % season_length.max(1)
}

fn rolling_stats(retained: &VecDeque<f64>) -> (f64, f64) {
    let n = retained.len() as f64;
    let mean = retained.iter().sum::<f64>() / n;
    let variance = retained.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

impl Forecaster {
    pub fn new(config: ForecasterConfig, max_capacity: i64) -> Self {
        Self {
            config,
            max_capacity: std::sync::atomic::AtomicI64::new(max_capacity),
            state: tokio::sync::Mutex::new(State::new(config.season_length)),
        }
    }

    pub fn set_max_capacity(&self, n: i64) {
        self.max_capacity.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn clip(&self, state: &State, y: f64, max_capacity: f64) -> f64 {
        if state.retained.len() >= self.config.outlier_min_observations {
            let (mu, sigma) = rolling_stats(&state.retained);
            y.clamp((mu - 3.0 * sigma).max(0.0), (mu + 3.0 * sigma).min(max_capacity))
        } else {
            y.clamp(0.0, max_capacity)
        }
    }

    fn apply_update(&self, state: &mut State, now: Timestamp, occupancy: f64, net_rate: f64) {
        let max_capacity = self.max_capacity.load(std::sync::atomic::Ordering::SeqCst) as f64;
        let y_clipped = self.clip(state, occupancy, max_capacity);

        let idx = season_index(now, self.config.season_length);
        let prev_level = state.level;
        let prev_trend = state.trend;
        let seasonal_i = state.seasonal[idx];

        let predicted = prev_level + prev_trend + seasonal_i + state.beta * net_rate;
        let error = y_clipped - predicted;

        let new_level = self.config.alpha * (y_clipped - seasonal_i - state.beta * net_rate)
            + (1.0 - self.config.alpha) * (prev_level + prev_trend);
        let new_trend = self.config.gamma * (new_level - prev_level) + (1.0 - self.config.gamma) * prev_trend;
        state.seasonal[idx] = self.config.delta * (y_clipped - new_level - state.beta * net_rate)
            + (1.0 - self.config.delta) * seasonal_i;
        state.beta = (state.beta + self.config.eta * error * net_rate).clamp(0.0, 1.0);

        state.level = new_level;
        state.trend = new_trend;
        state.last_x = net_rate;
        state.initialized = true;

        state.retained.push_back(y_clipped);
        while state.retained.len() > self.config.retained_window {
            state.retained.pop_front();
        }
    }

    /// Samples at most once per minute: updates within the same minute
    /// bucket replace the pending value instead of re-running the update
    /// equations (`# 9`). The update for a bucket runs only once the next
    /// bucket's observation arrives, at which point the bucket is final.
    pub async fn ingest(&self, now: Timestamp, occupancy: f64, net_rate: f64) {
        let bucket = now.timestamp().div_euclid(60);
        let mut state = self.state.lock().await;

        match state.pending {
            Some((b, _, _)) if b == bucket => {
                state.pending = Some((bucket, occupancy, net_rate));
            }
            Some((prev_bucket, prev_occ, prev_rate)) => {
                let prev_time = chrono::DateTime::from_timestamp(prev_bucket * 60, 0).unwrap();
                self.apply_update(&mut state, prev_time, prev_occ, prev_rate);
                state.pending = Some((bucket, occupancy, net_rate));
            }
            None => {
                state.pending = Some((bucket, occupancy, net_rate));
            }
        }
    }

    /// Initializes the model from a batch of historical observations
    /// (`# 4.F` cold-start), then replays them all through the update rule.
    pub async fn cold_start(&self, observations: &[(Timestamp, f64, f64)]) {
        if observations.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;

        let warm_n = observations.len().min(10);
        let level0 = observations[..warm_n].iter().map(|(_, y, _)| *y).sum::<f64>() / warm_n as f64;
        let trend0 = (observations.last().unwrap().1 - observations[0].1) / observations.len() as f64;

        state.level = level0;
        state.trend = trend0;

        let season_length = self.config.season_length;
        let mut season_sums = vec![0.0; season_length];
        let mut season_counts = vec![0usize; season_length];
        for (t, y, _) in observations {
            let idx = season_index(*t, season_length);
            season_sums[idx] += y - level0;
            season_counts[idx] += 1;
        }
        for i in 0..season_length {
            if season_counts[i] > 0 {
                state.seasonal[i] = season_sums[i] / season_counts[i] as f64;
            }
        }
        state.beta = 0.0;
        state.retained.clear();
        state.pending = None;

        for (t, y, x) in observations {
            self.apply_update(&mut state, *t, *y, *x);
        }
    }

    /// Forecasts `k` minutes ahead, `k` in `[1, 60]`.
    pub async fn forecast(&self, now: Timestamp, k: u32) -> ForecastResult {
        let state = self.state.lock().await;
        let max_capacity = self.max_capacity.load(std::sync::atomic::Ordering::SeqCst);

        let (current_occ, current_rate) = state
            .pending
            .map(|(_, occ, rate)| (occ, rate))
            .unwrap_or((state.level, state.last_x));

        let mut forecasts = Vec::with_capacity(k as usize);
        for j in 1..=k {
            let future_time = now + chrono::Duration::minutes(j as i64);
            let idx = season_index(future_time, self.config.season_length);
            let raw = state.level + j as f64 * state.trend + state.seasonal[idx] + state.beta * state.last_x;
            let value = raw.clamp(0.0, max_capacity as f64).round() as i64;
            let confidence = (-(j as f64) / 30.0).exp().max(0.1);
            forecasts.push(ForecastPoint { step: j, value, confidence });
        }

        let percent = if max_capacity > 0 { current_occ / max_capacity as f64 } else { 0.0 };
        let crowd_status = if current_occ as i64 >= max_capacity {
            "full"
        } else if percent >= 0.9 {
            "near"
        } else {
            "normal"
        };

        ForecastResult {
            current: current_occ.round() as i64,
            net_rate: current_rate,
            forecasts,
            crowd_status: crowd_status.to_string(),
            model_state: ModelStateSnapshot { level: state.level, trend: state.trend, beta: state.beta },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(minute_offset: i64) -> Timestamp {
        let base: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        base + chrono::Duration::minutes(minute_offset)
    }

    #[tokio::test]
    async fn forecast_stays_within_capacity_bounds() {
        let forecaster = Forecaster::new(ForecasterConfig::DEFAULT, 50);
        let observations: Vec<_> = (0..120).map(|i| (t(i), 20.0, 0.0)).collect();
        forecaster.cold_start(&observations).await;

        let result = forecaster.forecast(t(120), 30).await;
        for point in &result.forecasts {
            assert!(point.value >= 0 && point.value <= 50);
        }
    }

    #[tokio::test]
    async fn p5_update_is_deterministic_given_same_observations() {
        let obs: Vec<_> = (0..50).map(|i| (t(i), 10.0 + (i % 7) as f64, 0.1)).collect();

        let f1 = Forecaster::new(ForecasterConfig::DEFAULT, 100);
        f1.cold_start(&obs).await;
        let r1 = f1.forecast(t(50), 10).await;

        let f2 = Forecaster::new(ForecasterConfig::DEFAULT, 100);
        f2.cold_start(&obs).await;
        let r2 = f2.forecast(t(50), 10).await;

        assert_eq!(
            r1.forecasts.iter().map(|p| p.value).collect::<Vec<_>>(),
            r2.forecasts.iter().map(|p| p.value).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn sub_minute_updates_collapse_to_latest_value_in_bucket() {
        let forecaster = Forecaster::new(ForecasterConfig::DEFAULT, 100);
        // three observations in the same minute bucket; only the latest
        // should end up feeding the model once the bucket closes.
        forecaster.ingest(t(0), 5.0, 0.0).await;
        forecaster.ingest(t(0), 7.0, 0.0).await;
        forecaster.ingest(t(0), 9.0, 0.0).await;
        // next bucket: triggers the update for minute 0 using value 9.0
        forecaster.ingest(t(1), 9.0, 0.0).await;

        let state = forecaster.state.lock().await;
        // after a single update from y=9 starting at level 0, trend 0:
        // level = alpha * 9 = 2.7
        assert!((state.level - 2.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn confidence_decays_with_horizon() {
        let forecaster = Forecaster::new(ForecasterConfig::DEFAULT, 50);
        let observations: Vec<_> = (0..30).map(|i| (t(i), 10.0, 0.0)).collect();
        forecaster.cold_start(&observations).await;

        let result = forecaster.forecast(t(30), 5).await;
        for pair in result.forecasts.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}
