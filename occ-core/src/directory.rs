//! Token-to-occupant resolution. Credentials and registration are explicit
//! Non-goals of the core (`# 1`); this trait is the seam to that external
//! collaborator. `StaticDirectory` is a minimal stand-in used by tests and
//! by `occ-server` when no real identity provider is wired in.

use std::collections::HashMap;

use async_trait::async_trait;
use occ_utils::OccupantId;

#[async_trait]
pub trait OccupantDirectory: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<OccupantId>;
}

#[derive(Debug, Default)]
pub struct StaticDirectory {
    tokens: HashMap<String, OccupantId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, token: impl Into<String>, occupant_id: OccupantId) {
        self.tokens.insert(token.into(), occupant_id);
    }
}

#[async_trait]
impl OccupantDirectory for StaticDirectory {
    async fn resolve(&self, token: &str) -> Option<OccupantId> {
        self.tokens.get(token).copied()
    }
}
