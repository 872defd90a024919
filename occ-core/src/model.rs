//! Core data model (`# 3 DATA MODEL`): occupants, sessions, visit events, and
//! the two singletons (capacity configuration, space status).

use occ_utils::{OccupantId, Timestamp};
use serde::{Deserialize, Serialize};

/// Membership class. Privileged occupants are exempt from removal on the
/// privilege axis (their `P` factor is forced to zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivilegeTier {
    Privileged,
    Regular,
}

/// The subset of an occupant's profile owned by the core (the rest —
/// credentials, registration, role — belongs to external collaborators).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occupant {
    pub id: OccupantId,
    /// Exponentially-smoothed history of compliant exits, in `[0, 1]`.
    pub cooperativeness_score: f64,
    /// Monthly visit frequency, recomputed on every ENTRY.
    pub frequency_used: u32,
    pub privilege: PrivilegeTier,
    pub age: Option<u32>,
    pub last_visit: Option<Timestamp>,
    pub demographic: Option<String>,
}

impl Occupant {
    pub fn new_default(id: OccupantId) -> Self {
        Self {
            id,
            cooperativeness_score: 0.5,
            frequency_used: 0,
            privilege: PrivilegeTier::Regular,
            age: None,
            last_visit: None,
            demographic: None,
        }
    }
}

/// An open visit. Destroyed (not mutated into a closed state) by its
/// closing EXIT — see `# 3` Lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Session {
    pub occupant_id: OccupantId,
    pub entry_time: Timestamp,
    pub deadline: Timestamp,
    /// Monotone per process lifetime; used for FIFO tie-breaking (`I6`).
    pub sequence_no: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Entry,
    Exit,
}

/// An immutable log record. Never mutated or deleted once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitEvent {
    pub occupant_id: OccupantId,
    pub kind: EventKind,
    pub timestamp: Timestamp,
    pub deadline: Option<Timestamp>,
}

/// Singleton. `current_occupancy` is the authoritative counter maintained
/// by the event log (`# 4.A`); this struct is the externally-visible,
/// persisted reflection of it alongside the configured cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    pub max_capacity: u32,
    pub current_occupancy: u32,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceStatusKind {
    Open,
    Closed,
    Maintenance,
}

/// Singleton. `auto_open`/`auto_close` are wall-clock times of day
/// (`HH:MM`), applied only on weekdays by the status scheduler (`# 4.H`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceStatus {
    pub status: SpaceStatusKind,
    pub message: Option<String>,
    pub auto_open: Option<chrono::NaiveTime>,
    pub auto_close: Option<chrono::NaiveTime>,
    pub auto_schedule_enabled: bool,
    pub updated_at: Timestamp,
    pub updated_by: Option<String>,
}

impl SpaceStatus {
    pub fn default_open(now: Timestamp) -> Self {
        Self {
            status: SpaceStatusKind::Open,
            message: None,
            auto_open: None,
            auto_close: None,
            auto_schedule_enabled: false,
            updated_at: now,
            updated_by: None,
        }
    }
}
