//! Small, dependency-light utilities shared between the engine and its tests:
//! a test-friendly clock abstraction, id newtypes, and logging setup.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in time, as far as the engine is concerned. Always UTC.
pub type Timestamp = DateTime<Utc>;

/// Source of the current time. Every clock read in the engine goes through
/// this trait so that property tests and scenario tests can drive time
/// deterministically instead of racing the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the real wall clock. Used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock whose value is set explicitly by the test. Cloning shares the
/// same underlying counter, so advancing one handle advances every clone.
#[derive(Clone)]
pub struct ManualClock {
    micros_since_epoch: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros_since_epoch: Arc::new(AtomicI64::new(start.timestamp_micros())),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.micros_since_epoch
            .fetch_add(delta.num_microseconds().unwrap_or(0), Ordering::SeqCst);
    }

    pub fn set(&self, to: Timestamp) {
        self.micros_since_epoch
            .store(to.timestamp_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let micros = self.micros_since_epoch.load(Ordering::SeqCst);
        DateTime::from_timestamp_micros(micros).expect("manual clock value out of range")
    }
}

/// Stable identity of a person who can scan to enter/exit. Opaque beyond
/// equality/hashing/serialization; the core never interprets the contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccupantId(pub uuid::Uuid);

impl OccupantId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OccupantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OccupantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a single live notification-hub connection (one per open
/// WebSocket/SSE stream, say). Opaque, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the global `tracing` subscriber: plain formatter on stdout,
/// verbosity driven by `RUST_LOG` (defaulting to `info`). Call once at
/// process startup.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_shares_state_across_clones() {
        let start: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        let clock = ManualClock::new(start);
        let clone = clock.clone();

        assert_eq!(clock.now(), start);
        clone.advance(chrono::Duration::seconds(60));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(60));
    }

    #[test]
    fn occupant_ids_are_distinct() {
        assert_ne!(OccupantId::new(), OccupantId::new());
    }
}
