//! In-memory index of currently-open sessions (`# 4.B`). Not internally
//! synchronized: callers (the admission controller, the sweeper) mutate it
//! only while holding the space lock, matching `# 5`'s linearizability
//! requirement with the event log append it accompanies.

use std::collections::HashMap;

use occ_utils::{OccupantId, Timestamp};

use crate::model::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("occupant already has an open session")]
    AlreadyInside,
    #[error("occupant has no open session")]
    NotInside,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<OccupantId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session that the caller has already fully constructed
    /// (including its sequence number). Used both for normal admission and
    /// for rolling back a failed exit (re-inserting the exact session that
    /// was just removed).
    pub fn insert(&mut self, session: Session) -> Result<(), RegistryError> {
        if self.sessions.contains_key(&session.occupant_id) {
            return Err(RegistryError::AlreadyInside);
        }
        self.sessions.insert(session.occupant_id, session);
        Ok(())
    }

    pub fn remove(&mut self, occupant_id: OccupantId) -> Result<Session, RegistryError> {
        self.sessions
            .remove(&occupant_id)
            .ok_or(RegistryError::NotInside)
    }

    pub fn lookup(&self, occupant_id: OccupantId) -> Option<Session> {
        self.sessions.get(&occupant_id).copied()
    }

    /// Stable FIFO order: entry timestamp, then sequence number.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().copied().collect();
        sessions.sort_by(|a, b| {
            a.entry_time
                .cmp(&b.entry_time)
                .then(a.sequence_no.cmp(&b.sequence_no))
        });
        sessions
    }

    /// Sessions whose deadline has elapsed as of `t`, ascending by deadline
    /// (`# 4.E`'s ordering requirement, so forced exits stay chronological).
    pub fn expired_as_of(&self, t: Timestamp) -> Vec<Session> {
        let mut expired: Vec<Session> = self
            .sessions
            .values()
            .copied()
            .filter(|s| s.deadline <= t)
            .collect();
        expired.sort_by_key(|s| s.deadline);
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use occ_utils::OccupantId;

    fn session_at(id: OccupantId, entry: Timestamp, seq: u64) -> Session {
        Session {
            occupant_id: id,
            entry_time: entry,
            deadline: entry + Duration::hours(1),
            sequence_no: seq,
        }
    }

    #[test]
    fn insert_then_duplicate_insert_fails() {
        let mut reg = SessionRegistry::new();
        let now: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        let id = OccupantId::new();
        reg.insert(session_at(id, now, 1)).unwrap();
        assert_eq!(reg.insert(session_at(id, now, 2)), Err(RegistryError::AlreadyInside));
    }

    #[test]
    fn remove_unknown_fails() {
        let mut reg = SessionRegistry::new();
        assert_eq!(reg.remove(OccupantId::new()), Err(RegistryError::NotInside));
    }

    #[test]
    fn list_is_fifo_by_entry_then_sequence() {
        let mut reg = SessionRegistry::new();
        let t0: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        let a = OccupantId::new();
        let b = OccupantId::new();
        let c = OccupantId::new();
        reg.insert(session_at(b, t0 + Duration::minutes(5), 2)).unwrap();
        reg.insert(session_at(a, t0, 1)).unwrap();
        reg.insert(session_at(c, t0 + Duration::minutes(5), 3)).unwrap();

        let listed = reg.list();
        assert_eq!(listed[0].occupant_id, a);
        assert_eq!(listed[1].occupant_id, b);
        assert_eq!(listed[2].occupant_id, c);
    }

    #[test]
    fn expired_as_of_is_ascending_by_deadline() {
        let mut reg = SessionRegistry::new();
        let t0: Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        let a = OccupantId::new();
        let b = OccupantId::new();
        reg.insert(Session { occupant_id: a, entry_time: t0, deadline: t0 + Duration::minutes(30), sequence_no: 1 }).unwrap();
        reg.insert(Session { occupant_id: b, entry_time: t0, deadline: t0 + Duration::minutes(10), sequence_no: 2 }).unwrap();

        let expired = reg.expired_as_of(t0 + Duration::hours(1));
        assert_eq!(expired[0].occupant_id, b);
        assert_eq!(expired[1].occupant_id, a);
    }
}
