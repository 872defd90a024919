//! Facade (`# 4.I`): the transport-agnostic request surface of `# 6`. A
//! thin layer over `admission::Engine` — it owns input validation and the
//! response shapes, not the state machine itself.

use std::sync::Arc;

use occ_utils::{OccupantId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::admission::{Engine, ScanOutcome};
use crate::error::ScanError;
use crate::forecaster::ForecastResult;
use crate::model::{Occupant, Session, SpaceStatus, SpaceStatusKind};
use crate::ranker::ScoreBreakdown;

#[derive(Debug, Clone, Serialize)]
pub struct OccupancyView {
    pub count: i64,
    pub max: i64,
    pub percent: f64,
    pub status: SpaceStatusKind,
    pub last_update: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub occupant_id: OccupantId,
    pub entry_time: Timestamp,
    pub deadline: Timestamp,
    pub remaining_seconds: i64,
}

impl SessionView {
    fn from_session(session: Session, now: Timestamp) -> Self {
        Self {
            occupant_id: session.occupant_id,
            entry_time: session.entry_time,
            deadline: session.deadline,
            remaining_seconds: (session.deadline - now).num_seconds().max(0),
        }
    }
}

/// `# 6` "Adjust occupancy": `+n`/`-n` nudge the counter relative to its
/// current value, `=n` sets it outright. All three are expressed here as a
/// capacity-config change; the event log itself is never edited out of
/// band (`# 3`: VisitEvent records are never mutated or deleted), so this
/// only ever reconciles the *configured* counter, not history.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "mode", content = "amount", rename_all = "lowercase")]
pub enum OccupancyAdjustment {
    #[serde(rename = "+n")]
    Increase(u32),
    #[serde(rename = "-n")]
    Decrease(u32),
    #[serde(rename = "=n")]
    Set(u32),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredSessionView {
    pub occupant_id: OccupantId,
    pub entry_time: Timestamp,
    pub deadline: Timestamp,
    pub breakdown: ScoreBreakdown,
}

pub struct Facade {
    engine: Arc<Engine>,
}

impl Facade {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn scan(&self, token: &str) -> Result<ScanOutcome, ScanError> {
        self.engine.handle_scan(token).await
    }

    /// `# 6` "Get occupancy": the counter read and the status read are two
    /// separately-locked snapshots (acceptable because `# 5` only requires
    /// consistency within a single component's own critical section, not
    /// across A and H), folded into one view so callers never see a
    /// placeholder status.
    pub async fn get_occupancy(&self) -> OccupancyView {
        let (count, max, percent, last_update) = self.engine.get_occupancy();
        let status = self.engine.get_status().await.status;
        OccupancyView { count, max, percent, status, last_update }
    }

    pub async fn get_session(&self, occupant_id: OccupantId) -> Option<SessionView> {
        let now = self.engine.now();
        self.engine.get_session(occupant_id).await.map(|s| SessionView::from_session(s, now))
    }

    pub async fn set_max_capacity(&self, n: u32) -> Result<(), ScanError> {
        self.engine.set_max_capacity(n).await
    }

    pub async fn adjust_occupancy(&self, adjustment: OccupancyAdjustment) -> Result<(), ScanError> {
        let (current, _, _, _) = self.engine.get_occupancy();
        let target = match adjustment {
            OccupancyAdjustment::Increase(n) => current.saturating_add(n as i64),
            OccupancyAdjustment::Decrease(n) => (current - n as i64).max(0),
            OccupancyAdjustment::Set(n) => n as i64,
        };
        self.engine.adjust_occupancy(target).await
    }

    pub async fn set_status(
        &self,
        status: &str,
        message: Option<String>,
        auto_open: Option<&str>,
        auto_close: Option<&str>,
        auto_schedule_enabled: bool,
    ) -> Result<SpaceStatus, ScanError> {
        let parse_time = |s: &str| {
            chrono::NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ScanError::InvalidTimeFormat)
        };
        let auto_open = auto_open.map(parse_time).transpose()?;
        let auto_close = auto_close.map(parse_time).transpose()?;

        self.engine
            .set_status(status, message, auto_open, auto_close, auto_schedule_enabled, None)
            .await
    }

    pub async fn forecast(&self, k: u32) -> Result<ForecastResult, ScanError> {
        if !(10..=60).contains(&k) {
            return Err(ScanError::OutOfRange(format!("forecast horizon {k} must be in 10..=60")));
        }
        Ok(self.engine.forecast(k).await)
    }

    pub async fn list_scored(&self) -> Vec<ScoredSessionView> {
        self.engine
            .list_scored()
            .await
            .into_iter()
            .map(|(session, _occupant, breakdown)| ScoredSessionView {
                occupant_id: session.occupant_id,
                entry_time: session.entry_time,
                deadline: session.deadline,
                breakdown,
            })
            .collect()
    }

    pub async fn remove_top_n(&self, n: usize) -> Result<Vec<OccupantId>, ScanError> {
        if n == 0 {
            return Err(ScanError::OutOfRange("n must be >= 1".into()));
        }
        Ok(self.engine.force_remove_top(n).await)
    }

    pub async fn ingest_history(&self, batch: Vec<(Timestamp, f64, f64, f64)>) -> usize {
        self.engine.ingest_history(&batch).await
    }

    /// Write-through to the occupant profile an external registration
    /// collaborator owns (`# 1`). Exposed here so operators/tests can seed
    /// privilege, age, or demographic ahead of that occupant's first scan.
    pub async fn set_occupant_profile(&self, occupant: Occupant) -> Result<(), ScanError> {
        self.engine.upsert_occupant_profile(occupant).await
    }

    /// Runs one sweep tick immediately instead of waiting for the
    /// background worker's next period. Used by operators and by
    /// deterministic tests driving a `ManualClock`.
    pub async fn run_maintenance_sweep(&self) -> Vec<OccupantId> {
        self.engine.sweep_once().await
    }
}
