//! Persistence abstraction. `# 1` treats the on-disk format as an external
//! collaborator's concern; this trait is the seam, mirroring the teacher's
//! `GenericRemoteStorage` trait-over-backends pattern (`remote_storage`).

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use occ_utils::OccupantId;

use crate::error::PersistError;
use crate::model::{CapacityConfig, Occupant, SpaceStatus, VisitEvent};

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn append_event(&self, event: &VisitEvent) -> Result<(), PersistError>;

    /// Full event log, in append order. `# 4.A`'s `rebuild_counter` and the
    /// admission controller's 30-day frequency recomputation both read
    /// through this; a production-scale store would index by occupant and
    /// time instead of a full scan.
    async fn load_events(&self) -> Result<Vec<VisitEvent>, PersistError>;

    async fn load_occupant(&self, id: OccupantId) -> Result<Option<Occupant>, PersistError>;
    async fn save_occupant(&self, occupant: &Occupant) -> Result<(), PersistError>;

    async fn load_capacity_config(&self) -> Result<Option<CapacityConfig>, PersistError>;
    async fn save_capacity_config(&self, cfg: &CapacityConfig) -> Result<(), PersistError>;

    async fn append_status(&self, status: &SpaceStatus) -> Result<(), PersistError>;
    async fn load_latest_status(&self) -> Result<Option<SpaceStatus>, PersistError>;
}
