//! Embedded, crash-safe backend on top of `sled`. Each logical table from
//! `# 6`'s persisted state layout gets its own `sled::Tree`; the event log
//! and status history are append-only, keyed by a monotonically increasing
//! big-endian sequence so key order is append order.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use occ_utils::OccupantId;

use super::PersistenceStore;
use crate::error::PersistError;
use crate::model::{CapacityConfig, Occupant, SpaceStatus, VisitEvent};

const CAPACITY_KEY: &[u8] = b"capacity_config";

pub struct SledStore {
    events: sled::Tree,
    occupants: sled::Tree,
    singletons: sled::Tree,
    status_history: sled::Tree,
    next_event_seq: AtomicU64,
    next_status_seq: AtomicU64,
}

impl SledStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = sled::open(path).context("opening sled database")?;
        let events = db.open_tree("events")?;
        let occupants = db.open_tree("occupants")?;
        let singletons = db.open_tree("singletons")?;
        let status_history = db.open_tree("status_history")?;

        let next_event_seq = events
            .last()?
            .map(|(k, _)| be_key_to_u64(&k) + 1)
            .unwrap_or(0);
        let next_status_seq = status_history
            .last()?
            .map(|(k, _)| be_key_to_u64(&k) + 1)
            .unwrap_or(0);

        Ok(Self {
            events,
            occupants,
            singletons,
            status_history,
            next_event_seq: AtomicU64::new(next_event_seq),
            next_status_seq: AtomicU64::new(next_status_seq),
        })
    }
}

fn be_key_to_u64(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(key);
    u64::from_be_bytes(buf)
}

fn backend_err(e: impl std::error::Error + Send + Sync + 'static) -> PersistError {
    PersistError::Backend(anyhow::Error::new(e))
}

#[async_trait]
impl PersistenceStore for SledStore {
    async fn append_event(&self, event: &VisitEvent) -> Result<(), PersistError> {
        let seq = self.next_event_seq.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec(event).map_err(backend_err)?;
        self.events
            .insert(seq.to_be_bytes(), bytes)
            .map_err(backend_err)?;
        self.events.flush_async().await.map_err(backend_err)?;
        Ok(())
    }

    async fn load_events(&self) -> Result<Vec<VisitEvent>, PersistError> {
        self.events
            .iter()
            .values()
            .map(|v| {
                let bytes = v.map_err(backend_err)?;
                serde_json::from_slice(&bytes).map_err(backend_err)
            })
            .collect()
    }

    async fn load_occupant(&self, id: OccupantId) -> Result<Option<Occupant>, PersistError> {
        let key = id.0.as_bytes();
        match self.occupants.get(key).map_err(backend_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(backend_err)?)),
            None => Ok(None),
        }
    }

    async fn save_occupant(&self, occupant: &Occupant) -> Result<(), PersistError> {
        let key = occupant.id.0.as_bytes();
        let bytes = serde_json::to_vec(occupant).map_err(backend_err)?;
        self.occupants.insert(key, bytes).map_err(backend_err)?;
        self.occupants.flush_async().await.map_err(backend_err)?;
        Ok(())
    }

    async fn load_capacity_config(&self) -> Result<Option<CapacityConfig>, PersistError> {
        match self.singletons.get(CAPACITY_KEY).map_err(backend_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(backend_err)?)),
            None => Ok(None),
        }
    }

    async fn save_capacity_config(&self, cfg: &CapacityConfig) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec(cfg).map_err(backend_err)?;
        self.singletons
            .insert(CAPACITY_KEY, bytes)
            .map_err(backend_err)?;
        self.singletons.flush_async().await.map_err(backend_err)?;
        Ok(())
    }

    async fn append_status(&self, status: &SpaceStatus) -> Result<(), PersistError> {
        let seq = self.next_status_seq.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec(status).map_err(backend_err)?;
        self.status_history
            .insert(seq.to_be_bytes(), bytes)
            .map_err(backend_err)?;
        self.status_history.flush_async().await.map_err(backend_err)?;
        Ok(())
    }

    async fn load_latest_status(&self) -> Result<Option<SpaceStatus>, PersistError> {
        match self.status_history.last().map_err(backend_err)? {
            Some((_, bytes)) => Ok(Some(serde_json::from_slice(&bytes).map_err(backend_err)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventKind, Occupant};
    use occ_utils::OccupantId;

    #[tokio::test]
    async fn round_trips_events_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let id = OccupantId::new();
        let now: occ_utils::Timestamp = "2026-01-01T00:00:00Z".parse().unwrap();
        for i in 0..5 {
            store
                .append_event(&VisitEvent {
                    occupant_id: id,
                    kind: if i % 2 == 0 { EventKind::Entry } else { EventKind::Exit },
                    timestamp: now + chrono::Duration::minutes(i),
                    deadline: None,
                })
                .await
                .unwrap();
        }

        let loaded = store.load_events().await.unwrap();
        assert_eq!(loaded.len(), 5);
        for (i, event) in loaded.iter().enumerate() {
            assert_eq!(event.timestamp, now + chrono::Duration::minutes(i as i64));
        }
    }

    #[tokio::test]
    async fn occupant_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let occupant = Occupant::new_default(OccupantId::new());
        store.save_occupant(&occupant).await.unwrap();

        let loaded = store.load_occupant(occupant.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, occupant.id);
        assert_eq!(loaded.cooperativeness_score, 0.5);
    }
}
