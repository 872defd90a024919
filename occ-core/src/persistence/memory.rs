//! In-process store used by every test and by `occ-server` when run without
//! a `--data-dir`. Not durable across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use occ_utils::OccupantId;
use tokio::sync::Mutex;

use super::PersistenceStore;
use crate::error::PersistError;
use crate::model::{CapacityConfig, Occupant, SpaceStatus, VisitEvent};

#[derive(Default)]
struct Inner {
    events: Vec<VisitEvent>,
    occupants: HashMap<OccupantId, Occupant>,
    capacity: Option<CapacityConfig>,
    status_history: Vec<SpaceStatus>,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn append_event(&self, event: &VisitEvent) -> Result<(), PersistError> {
        self.inner.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn load_events(&self) -> Result<Vec<VisitEvent>, PersistError> {
        Ok(self.inner.lock().await.events.clone())
    }

    async fn load_occupant(&self, id: OccupantId) -> Result<Option<Occupant>, PersistError> {
        Ok(self.inner.lock().await.occupants.get(&id).cloned())
    }

    async fn save_occupant(&self, occupant: &Occupant) -> Result<(), PersistError> {
        self.inner
            .lock()
            .await
            .occupants
            .insert(occupant.id, occupant.clone());
        Ok(())
    }

    async fn load_capacity_config(&self) -> Result<Option<CapacityConfig>, PersistError> {
        Ok(self.inner.lock().await.capacity.clone())
    }

    async fn save_capacity_config(&self, cfg: &CapacityConfig) -> Result<(), PersistError> {
        self.inner.lock().await.capacity = Some(cfg.clone());
        Ok(())
    }

    async fn append_status(&self, status: &SpaceStatus) -> Result<(), PersistError> {
        self.inner.lock().await.status_history.push(status.clone());
        Ok(())
    }

    async fn load_latest_status(&self) -> Result<Option<SpaceStatus>, PersistError> {
        Ok(self.inner.lock().await.status_history.last().cloned())
    }
}
