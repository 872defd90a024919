//! Capacity Admission Controller (`# 4.D`): the single entry point that
//! turns a scan into ENTRY/EXIT/rejection, and the shared EXIT primitive
//! reused by the scan path, eviction, and the sweeper (`# 9`, "must share
//! the admission path"). Everything here runs under the space-wide
//! exclusive lock described in `# 5`; notifications and forecaster updates
//! happen only after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use occ_utils::{Clock, OccupantId, Timestamp};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::directory::OccupantDirectory;
use crate::error::ScanError;
use crate::event_log::EventLog;
use crate::forecaster::{ForecastResult, Forecaster};
use crate::http::HealthState;
use crate::model::{CapacityConfig, EventKind, Occupant, Session, SpaceStatus, SpaceStatusKind, VisitEvent};
use crate::notifications::{CrowdLevel, NotificationHub, Topic};
use crate::persistence::PersistenceStore;
use crate::ranker::{rank, RankerConstants, RankerWeights, ScoreBreakdown};
use crate::session_registry::SessionRegistry;

#[derive(Debug, Clone, Copy)]
pub enum ScanOutcome {
    Admitted(Session),
    Exited(Session),
}

struct EngineState {
    registry: SessionRegistry,
    occupants: HashMap<OccupantId, Occupant>,
    capacity: CapacityConfig,
    status: SpaceStatus,
    next_sequence: u64,
}

/// A counter commit stamped with the sequence assigned while the space lock
/// was still held, so the order these reach the dispatcher in `seq` is the
/// same order the underlying commits actually happened in.
struct OccupancyCommit {
    seq: u64,
    count: i64,
    max: i64,
}

fn parse_status_kind(raw: &str) -> Result<SpaceStatusKind, ScanError> {
    match raw.to_ascii_lowercase().as_str() {
        "open" => Ok(SpaceStatusKind::Open),
        "closed" => Ok(SpaceStatusKind::Closed),
        "maintenance" => Ok(SpaceStatusKind::Maintenance),
        _ => Err(ScanError::InvalidStatus),
    }
}

fn crowd_level(count: i64, max: i64) -> CrowdLevel {
    if max <= 0 || count >= max {
        CrowdLevel::Full
    } else if count as f64 / max as f64 >= 0.9 {
        CrowdLevel::Near
    } else {
        CrowdLevel::Normal
    }
}

/// `# 5`'s ordering guarantee ("`occupancy_update` messages are emitted in
/// the same real-time order in which the underlying counter changes
/// committed") can't be had by broadcasting right after dropping the space
/// lock: two scans on different worker threads can commit in one order and
/// have their post-lock broadcast calls scheduled in the other. Every
/// commit site hands its `OccupancyCommit` to this single-consumer task
/// instead, which buffers out-of-order arrivals by `seq` and only forwards
/// once every earlier commit has already been forwarded.
async fn run_commit_dispatcher(mut rx: mpsc::UnboundedReceiver<OccupancyCommit>, hub: Arc<NotificationHub>) {
    let mut pending: BTreeMap<u64, OccupancyCommit> = BTreeMap::new();
    let mut next_seq = 0u64;
    while let Some(commit) = rx.recv().await {
        pending.insert(commit.seq, commit);
        while let Some(commit) = pending.remove(&next_seq) {
            hub.broadcast(
                Topic::OccupancyUpdate,
                json!({"count": commit.count, "max": commit.max, "seq": commit.seq}),
            );
            hub.maybe_alert(crowd_level(commit.count, commit.max), json!({"count": commit.count, "max": commit.max}));
            next_seq += 1;
        }
    }
}

/// The Admission Controller plus the state it serializes access to. Owns
/// the event log and session registry outright; holds `Arc`s to the
/// collaborators whose locks must never be held at the same time as the
/// space lock (`F`, `G` — `# 5`'s ordering rule).
pub struct Engine {
    store: Arc<dyn PersistenceStore>,
    directory: Arc<dyn OccupantDirectory>,
    notifications: Arc<NotificationHub>,
    forecaster: Arc<Forecaster>,
    clock: Arc<dyn Clock>,
    health: Arc<HealthState>,
    event_log: EventLog,
    weights: RankerWeights,
    constants: RankerConstants,
    session_length: chrono::Duration,
    state: Mutex<EngineState>,
    next_commit_seq: AtomicU64,
    commit_tx: mpsc::UnboundedSender<OccupancyCommit>,
}

impl Engine {
    /// Runs startup recovery per `# 6`: reconstructs the counter and the
    /// open-session index from the full event log, then loads the
    /// persisted capacity/status singletons (or their documented defaults).
    pub async fn new(
        store: Arc<dyn PersistenceStore>,
        directory: Arc<dyn OccupantDirectory>,
        notifications: Arc<NotificationHub>,
        forecaster: Arc<Forecaster>,
        clock: Arc<dyn Clock>,
        health: Arc<HealthState>,
        weights: RankerWeights,
        constants: RankerConstants,
        session_length: chrono::Duration,
        default_max_capacity: u32,
    ) -> Result<Self, ScanError> {
        weights.assert_normalized();
        let now = clock.now();

        let capacity = store
            .load_capacity_config()
            .await
            .map_err(|_| ScanError::PersistenceUnavailable)?
            .unwrap_or(CapacityConfig { max_capacity: default_max_capacity, current_occupancy: 0, updated_at: now });
        let status = store
            .load_latest_status()
            .await
            .map_err(|_| ScanError::PersistenceUnavailable)?
            .unwrap_or_else(|| SpaceStatus::default_open(now));

        let event_log = EventLog::new(store.clone(), health.clone(), capacity.max_capacity, now);
        event_log.rebuild_counter().await?;

        let events = store.load_events().await.map_err(|_| ScanError::PersistenceUnavailable)?;
        let mut open: HashMap<OccupantId, Session> = HashMap::new();
        let mut next_sequence: u64 = 0;
        for event in &events {
            next_sequence += 1;
            match event.kind {
                EventKind::Entry => {
                    if let Some(deadline) = event.deadline {
                        open.insert(
                            event.occupant_id,
                            Session {
                                occupant_id: event.occupant_id,
                                entry_time: event.timestamp,
                                deadline,
                                sequence_no: next_sequence,
                            },
                        );
                    }
                }
                EventKind::Exit => {
                    open.remove(&event.occupant_id);
                }
            }
        }

        let mut registry = SessionRegistry::new();
        let mut occupants = HashMap::new();
        for session in open.into_values() {
            registry.insert(session).map_err(|_| ScanError::AlreadyInside)?;
            if let Ok(Some(occupant)) = store.load_occupant(session.occupant_id).await {
                occupants.insert(session.occupant_id, occupant);
            }
        }

        // `# 6` startup lifecycle: "reloads the forecaster from the last 24
        // hours" — replay the trailing 24h of the event log through the
        // same ENTRY=+1/EXIT=-1 net-rate convention `handle_scan` uses for
        // live ingestion, so the model isn't cold after every restart.
        let window_start = now - chrono::Duration::hours(24);
        let mut replay_counter: i64 = 0;
        for event in &events {
            if event.timestamp < window_start {
                match event.kind {
                    EventKind::Entry => replay_counter += 1,
                    EventKind::Exit => replay_counter = (replay_counter - 1).max(0),
                }
            }
        }
        let mut observations = Vec::new();
        for event in &events {
            if event.timestamp < window_start {
                continue;
            }
            match event.kind {
                EventKind::Entry => {
                    replay_counter += 1;
                    observations.push((event.timestamp, replay_counter as f64, 1.0));
                }
                EventKind::Exit => {
                    replay_counter = (replay_counter - 1).max(0);
                    observations.push((event.timestamp, replay_counter as f64, -1.0));
                }
            }
        }
        if !observations.is_empty() {
            forecaster.cold_start(&observations).await;
        }

        let state = EngineState { registry, occupants, capacity, status, next_sequence };

        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_commit_dispatcher(commit_rx, notifications.clone()));

        Ok(Self {
            store,
            directory,
            notifications,
            forecaster,
            clock,
            health,
            event_log,
            weights,
            constants,
            session_length,
            state: Mutex::new(state),
            next_commit_seq: AtomicU64::new(0),
            commit_tx,
        })
    }

    /// Occupant profiles (privilege, age, demographic) are owned by the
    /// external registration collaborator (`# 1`) and live in the same
    /// persistence store; the engine only ever updates cooperativeness,
    /// frequency, and last-visit on top of whatever it finds there. Reads
    /// through the in-memory cache first, then the store, defaulting only
    /// for occupants truly never seen before.
    async fn resolve_occupant(&self, state: &mut EngineState, occupant_id: OccupantId) -> Occupant {
        if let Some(occupant) = state.occupants.get(&occupant_id) {
            return occupant.clone();
        }
        let occupant = self
            .store
            .load_occupant(occupant_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| Occupant::new_default(occupant_id));
        state.occupants.insert(occupant_id, occupant.clone());
        occupant
    }

    /// The shared EXIT primitive (`# 4.D` step 3, `# 9`): closes the
    /// session, appends EXIT (rolling back the registry mutation on
    /// persistence failure), and applies the cooperativeness EMA. Called
    /// with the space lock already held, from the scan path, eviction, and
    /// the sweeper alike.
    async fn exit_primitive(
        &self,
        state: &mut EngineState,
        occupant_id: OccupantId,
        now: Timestamp,
    ) -> Result<(Session, bool), ScanError> {
        let session = state.registry.remove(occupant_id).map_err(|_| ScanError::NotInside)?;

        let event = VisitEvent { occupant_id, kind: EventKind::Exit, timestamp: now, deadline: None };
        if let Err(err) = self.event_log.append(event, now).await {
            state
                .registry
                .insert(session)
                .expect("rollback reinsert of a session we just removed cannot conflict");
            return Err(err);
        }

        let voluntary = now < session.deadline;
        let mut occupant = self.resolve_occupant(state, occupant_id).await;
        occupant.cooperativeness_score = if voluntary {
            (0.8 * occupant.cooperativeness_score + 0.2).clamp(0.0, 1.0)
        } else {
            (0.95 * occupant.cooperativeness_score + 0.05 * 0.3).clamp(0.0, 1.0)
        };
        occupant.last_visit = Some(now);
        state.occupants.insert(occupant_id, occupant.clone());

        let save_result = self.store.save_occupant(&occupant).await;
        self.health.record_result(save_result.is_ok(), now.timestamp().max(0) as u64);
        if let Err(err) = save_result {
            tracing::warn!(%occupant_id, error = %err, "failed to persist occupant profile after exit");
        }

        Ok((session, voluntary))
    }

    async fn enter_primitive(
        &self,
        state: &mut EngineState,
        occupant_id: OccupantId,
        now: Timestamp,
    ) -> Result<Session, ScanError> {
        let deadline = now + self.session_length;
        let sequence_no = state.next_sequence;
        let session = Session { occupant_id, entry_time: now, deadline, sequence_no };

        state.registry.insert(session).map_err(|_| ScanError::AlreadyInside)?;

        let event = VisitEvent { occupant_id, kind: EventKind::Entry, timestamp: now, deadline: Some(deadline) };
        if let Err(err) = self.event_log.append(event, now).await {
            state.registry.remove(occupant_id).ok();
            return Err(err);
        }
        state.next_sequence += 1;

        let since = now - chrono::Duration::days(30);
        let frequency_used = self
            .event_log
            .entry_count_in_window(occupant_id, since, now)
            .await
            .unwrap_or(0);

        let mut occupant = self.resolve_occupant(state, occupant_id).await;
        occupant.frequency_used = frequency_used;
        state.occupants.insert(occupant_id, occupant.clone());

        let save_result = self.store.save_occupant(&occupant).await;
        self.health.record_result(save_result.is_ok(), now.timestamp().max(0) as u64);
        if let Err(err) = save_result {
            tracing::warn!(%occupant_id, error = %err, "failed to persist occupant profile after entry");
        }

        Ok(session)
    }

    /// `# 4.D`: resolves the token, determines ENTRY vs EXIT under the
    /// space lock, and runs the full admission algorithm.
    #[tracing::instrument(skip(self, token))]
    pub async fn handle_scan(&self, token: &str) -> Result<ScanOutcome, ScanError> {
        if !self.health.is_healthy() {
            // `# 5`: once persistence has been failing past the configured
            // threshold, scans fail fast instead of attempting (and
            // blocking on) another doomed append.
            return Err(ScanError::PersistenceUnavailable);
        }

        let occupant_id = self.directory.resolve(token).await.ok_or(ScanError::InvalidToken)?;
        let now = self.clock.now();

        let mut guard = self.state.lock().await;

        if guard.registry.lookup(occupant_id).is_some() {
            let (session, voluntary) = self.exit_primitive(&mut guard, occupant_id, now).await?;
            let (count, max, _) = self.event_log.snapshot();
            let seq = self.next_commit_seq.fetch_add(1, Ordering::SeqCst);
            drop(guard);

            self.notifications
                .unicast(occupant_id, Topic::UserAction, json!({"action": "exit", "voluntary": voluntary}));
            self.commit_tx.send(OccupancyCommit { seq, count, max }).ok();
            self.forecaster.ingest(now, count as f64, -1.0).await;
            metrics::gauge!("occ_current_occupancy").set(count as f64);

            tracing::info!(%occupant_id, voluntary, "exit");
            return Ok(ScanOutcome::Exited(session));
        }

        if guard.status.status != SpaceStatusKind::Open {
            let message = guard.status.message.clone().unwrap_or_else(|| format!("{:?}", guard.status.status));
            metrics::counter!("occ_rejections_total", "reason" => "closed").increment(1);
            return Err(ScanError::RejectedClosed { message });
        }

        let max_capacity = self.event_log.max_capacity();
        let mut evicted: Option<OccupantId> = None;

        if self.event_log.current_occupancy() >= max_capacity {
            let sessions = guard.registry.list();
            let mut pairs: Vec<(Session, Occupant)> = Vec::with_capacity(sessions.len());
            for session in sessions {
                let occupant = self.resolve_occupant(&mut guard, session.occupant_id).await;
                pairs.push((session, occupant));
            }

            if pairs.is_empty() {
                metrics::counter!("occ_rejections_total", "reason" => "full_unremovable").increment(1);
                return Err(ScanError::RejectedFullAndUnremovable);
            }

            let ranked = rank(&pairs, now, &self.weights, &self.constants);
            let top_occupant_id = ranked[0].0.occupant_id;
            let (_, _) = self.exit_primitive(&mut guard, top_occupant_id, now).await?;
            evicted = Some(top_occupant_id);
            metrics::counter!("occ_evictions_total").increment(1);

            if self.event_log.current_occupancy() >= max_capacity {
                metrics::counter!("occ_rejections_total", "reason" => "full_unremovable").increment(1);
                return Err(ScanError::RejectedFullAndUnremovable);
            }
        }

        let session = self.enter_primitive(&mut guard, occupant_id, now).await?;
        let (count, max, _) = self.event_log.snapshot();
        let seq = self.next_commit_seq.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        if let Some(evicted_id) = evicted {
            self.notifications.unicast(evicted_id, Topic::UserRemoved, json!({"reason": "capacity"}));
        }
        self.notifications
            .unicast(occupant_id, Topic::UserAction, json!({"action": "entry"}));
        self.commit_tx.send(OccupancyCommit { seq, count, max }).ok();
        self.forecaster.ingest(now, count as f64, 1.0).await;
        metrics::counter!("occ_admissions_total").increment(1);
        metrics::gauge!("occ_current_occupancy").set(count as f64);

        tracing::info!(%occupant_id, evicted = evicted.is_some(), "entry");
        Ok(ScanOutcome::Admitted(session))
    }

    /// `# 4.E`'s tick, shared with the sweeper worker: closes every session
    /// whose deadline has elapsed, ascending by deadline, through the same
    /// EXIT primitive the scan path uses.
    pub(crate) async fn sweep_once(&self) -> Vec<OccupantId> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let expired = guard.registry.expired_as_of(now);

        let mut closed = Vec::new();
        for session in expired {
            // defensive re-check: a concurrent voluntary exit may have
            // already closed this session within this same tick.
            if guard.registry.lookup(session.occupant_id).is_none() {
                continue;
            }
            match self.exit_primitive(&mut guard, session.occupant_id, session.deadline).await {
                Ok(_) => closed.push(session.occupant_id),
                Err(err) => tracing::warn!(occupant_id = %session.occupant_id, error = %err, "sweep exit failed"),
            }
        }

        let (count, max, _) = self.event_log.snapshot();
        let seq = if !closed.is_empty() { Some(self.next_commit_seq.fetch_add(1, Ordering::SeqCst)) } else { None };
        drop(guard);

        for occupant_id in &closed {
            self.notifications
                .unicast(*occupant_id, Topic::SessionExpired, json!({}));
        }
        if let Some(seq) = seq {
            self.commit_tx.send(OccupancyCommit { seq, count, max }).ok();
            self.forecaster.ingest(now, count as f64, -(closed.len() as f64)).await;
            metrics::counter!("occ_auto_exits_total").increment(closed.len() as u64);
            metrics::gauge!("occ_current_occupancy").set(count as f64);
        }
        closed
    }

    /// `# 6` "Set max capacity": does not evict on reduction below the
    /// current occupancy — entries are simply refused until the count
    /// drops on its own (voluntary exits or sweeps).
    pub async fn set_max_capacity(&self, n: u32) -> Result<(), ScanError> {
        if n == 0 || n > 10_000 {
            return Err(ScanError::OutOfRange(format!("max_capacity must be in 1..=10000, got {n}")));
        }
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        self.event_log.set_max_capacity(n);
        self.forecaster.set_max_capacity(n as i64);
        guard.capacity.max_capacity = n;
        guard.capacity.current_occupancy = self.event_log.current_occupancy().max(0) as u32;
        guard.capacity.updated_at = now;
        let cfg = guard.capacity.clone();
        drop(guard);

        let save_result = self.store.save_capacity_config(&cfg).await;
        self.health.record_result(save_result.is_ok(), now.timestamp().max(0) as u64);
        if let Err(err) = save_result {
            tracing::warn!(error = %err, "failed to persist capacity config");
        }
        Ok(())
    }

    /// `# 6` "Set status": `status` is the raw, unvalidated request value
    /// (case-insensitive `open`/`closed`/`maintenance`); returns
    /// `InvalidStatus` on anything else, symmetric with how
    /// `auto_open`/`auto_close` are validated into `InvalidTimeFormat`.
    pub async fn set_status(
        &self,
        status: &str,
        message: Option<String>,
        auto_open: Option<chrono::NaiveTime>,
        auto_close: Option<chrono::NaiveTime>,
        auto_schedule_enabled: bool,
        updated_by: Option<String>,
    ) -> Result<SpaceStatus, ScanError> {
        let status = parse_status_kind(status)?;
        let now = self.clock.now();
        let new_status = SpaceStatus { status, message, auto_open, auto_close, auto_schedule_enabled, updated_at: now, updated_by };

        let mut guard = self.state.lock().await;
        guard.status = new_status.clone();
        drop(guard);

        let append_result = self.store.append_status(&new_status).await;
        self.health.record_result(append_result.is_ok(), now.timestamp().max(0) as u64);
        if let Err(err) = append_result {
            tracing::warn!(error = %err, "failed to persist status change");
        }
        self.notifications.broadcast(
            Topic::StatusUpdate,
            serde_json::to_value(&new_status).unwrap_or(serde_json::Value::Null),
        );
        Ok(new_status)
    }

    /// `# 4.I` `force_remove_top(n)`: evicts up to `n` sessions (capped at
    /// the registry's size), each through the shared EXIT primitive.
    pub async fn force_remove_top(&self, n: usize) -> Vec<OccupantId> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;

        let mut removed = Vec::new();
        for _ in 0..n {
            let sessions = guard.registry.list();
            let mut pairs: Vec<(Session, Occupant)> = Vec::with_capacity(sessions.len());
            for session in sessions {
                let occupant = self.resolve_occupant(&mut guard, session.occupant_id).await;
                pairs.push((session, occupant));
            }
            if pairs.is_empty() {
                break;
            }
            let ranked = rank(&pairs, now, &self.weights, &self.constants);
            let top_occupant_id = ranked[0].0.occupant_id;
            match self.exit_primitive(&mut guard, top_occupant_id, now).await {
                Ok(_) => removed.push(top_occupant_id),
                Err(_) => break,
            }
        }

        let (count, max, _) = self.event_log.snapshot();
        let seq = if !removed.is_empty() { Some(self.next_commit_seq.fetch_add(1, Ordering::SeqCst)) } else { None };
        drop(guard);

        for occupant_id in &removed {
            self.notifications
                .unicast(*occupant_id, Topic::UserRemoved, json!({"reason": "forced"}));
        }
        if let Some(seq) = seq {
            self.commit_tx.send(OccupancyCommit { seq, count, max }).ok();
        }
        removed
    }

    pub async fn list_scored(&self) -> Vec<(Session, Occupant, ScoreBreakdown)> {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let sessions = guard.registry.list();
        let mut pairs: Vec<(Session, Occupant)> = Vec::with_capacity(sessions.len());
        for session in sessions {
            let occupant = self.resolve_occupant(&mut guard, session.occupant_id).await;
            pairs.push((session, occupant));
        }
        drop(guard);
        rank(&pairs, now, &self.weights, &self.constants)
    }

    /// Write-through for the external registration collaborator (`# 1`):
    /// the core never originates privilege/age/demographic, but needs a
    /// seam for whatever writes them to invalidate its cache.
    pub async fn upsert_occupant_profile(&self, occupant: Occupant) -> Result<(), ScanError> {
        let result = self.store.save_occupant(&occupant).await;
        self.health.record_result(result.is_ok(), self.clock.now().timestamp().max(0) as u64);
        result.map_err(|_| ScanError::PersistenceUnavailable)?;
        let mut guard = self.state.lock().await;
        guard.occupants.insert(occupant.id, occupant);
        Ok(())
    }

    pub async fn get_session(&self, occupant_id: OccupantId) -> Option<Session> {
        self.state.lock().await.registry.lookup(occupant_id)
    }

    /// `(count, max, percent, last_update)` — the counter read is
    /// lock-free per `# 5`.
    pub fn get_occupancy(&self) -> (i64, i64, f64, Timestamp) {
        let (count, max, last_update) = self.event_log.snapshot();
        let percent = if max > 0 { count as f64 / max as f64 } else { 0.0 };
        (count, max, percent, last_update)
    }

    /// `# 6` "Adjust occupancy": reconciles the authoritative counter to
    /// `target` directly, bounded to `[0, max_capacity]`. Distinct from
    /// `set_max_capacity`, which changes the cap rather than the count.
    pub async fn adjust_occupancy(&self, target: i64) -> Result<(), ScanError> {
        if target < 0 || target > 10_000 {
            return Err(ScanError::OutOfRange(format!("adjusted occupancy {target} out of bounds")));
        }
        let now = self.clock.now();
        let guard = self.state.lock().await;
        let max = guard.capacity.max_capacity as i64;
        let bounded = target.clamp(0, max);
        self.event_log.force_set_counter(bounded, now);
        let seq = self.next_commit_seq.fetch_add(1, Ordering::SeqCst);
        drop(guard);

        let (count, max, _) = self.event_log.snapshot();
        self.commit_tx.send(OccupancyCommit { seq, count, max }).ok();
        Ok(())
    }

    pub async fn get_status(&self) -> SpaceStatus {
        self.state.lock().await.status.clone()
    }

    /// Exposes the injected clock to other workers (the status scheduler)
    /// that need "now" but don't otherwise touch engine state.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub async fn forecast(&self, k: u32) -> ForecastResult {
        let now = self.clock.now();
        self.forecaster.forecast(now, k).await
    }

    pub async fn ingest_history(&self, batch: &[(Timestamp, f64, f64, f64)]) -> usize {
        let observations: Vec<(Timestamp, f64, f64)> = batch
            .iter()
            .map(|(t, occupancy, entry_rate, exit_rate)| (*t, *occupancy, entry_rate - exit_rate))
            .collect();
        self.forecaster.cold_start(&observations).await;
        observations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::forecaster::ForecasterConfig;
    use crate::persistence::InMemoryStore;
    use occ_utils::ManualClock;

    fn t0() -> Timestamp {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    async fn engine_with_capacity(max_capacity: u32) -> (Engine, OccupantId, ManualClock) {
        let mut dir = StaticDirectory::new();
        let occupant_id = OccupantId::new();
        dir.register("token-a", occupant_id);

        let clock = ManualClock::new(t0());
        let engine = Engine::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(dir),
            Arc::new(NotificationHub::new()),
            Arc::new(Forecaster::new(ForecasterConfig::DEFAULT, max_capacity as i64)),
            Arc::new(clock.clone()),
            Arc::new(crate::http::HealthState::new(std::time::Duration::from_secs(30))),
            RankerWeights::DEFAULT,
            RankerConstants::DEFAULT,
            chrono::Duration::hours(1),
            max_capacity,
        )
        .await
        .unwrap();

        (engine, occupant_id, clock)
    }

    #[tokio::test]
    async fn scenario_1_admit_and_exit() {
        let (engine, _id, clock) = engine_with_capacity(2).await;

        let outcome = engine.handle_scan("token-a").await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Admitted(_)));
        assert_eq!(engine.get_occupancy().0, 1);

        clock.advance(chrono::Duration::seconds(10));
        let outcome = engine.handle_scan("token-a").await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Exited(_)));
        assert_eq!(engine.get_occupancy().0, 0);
    }

    #[tokio::test]
    async fn scenario_2_rejected_when_closed() {
        let (engine, _id, _clock) = engine_with_capacity(5).await;
        engine
            .set_status("closed", Some("closed for the day".into()), None, None, false, None)
            .await
            .unwrap();

        let err = engine.handle_scan("token-a").await.unwrap_err();
        assert!(matches!(err, ScanError::RejectedClosed { .. }));
        assert_eq!(engine.get_occupancy().0, 0);
    }

    #[tokio::test]
    async fn set_status_rejects_unrecognized_value() {
        let (engine, _id, _clock) = engine_with_capacity(5).await;
        let err = engine.set_status("unlocked", None, None, None, false, None).await.unwrap_err();
        assert_eq!(err, ScanError::InvalidStatus);
    }

    #[tokio::test]
    async fn scenario_4_full_with_no_evictable_occupant() {
        let (engine, _id, _clock) = engine_with_capacity(0).await;
        let err = engine.handle_scan("token-a").await.unwrap_err();
        assert_eq!(err, ScanError::RejectedFullAndUnremovable);
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_before_taking_the_lock() {
        let (engine, _id, _clock) = engine_with_capacity(5).await;
        let err = engine.handle_scan("no-such-token").await.unwrap_err();
        assert_eq!(err, ScanError::InvalidToken);
    }

    #[tokio::test]
    async fn set_max_capacity_below_occupancy_does_not_evict() {
        let (engine, _id, _clock) = engine_with_capacity(5).await;
        engine.handle_scan("token-a").await.unwrap();

        engine.set_max_capacity(1).await.unwrap();
        assert_eq!(engine.get_occupancy().0, 1);
        assert_eq!(engine.get_occupancy().1, 1);
    }
}
