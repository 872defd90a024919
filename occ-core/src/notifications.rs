//! Per-connection registry and topic fan-out (`# 4.G`). Transport-agnostic:
//! a "connection" is just a channel the transport layer (e.g. `http.rs`'s
//! WebSocket handler) owns the receiving half of. Delivery is best-effort —
//! a full or closed channel never rolls back the state change that
//! triggered the notification.

use dashmap::DashMap;
use occ_utils::{ConnectionId, OccupantId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    OccupancyUpdate,
    OccupancyAlert,
    UserAction,
    UserRemoved,
    SessionExpired,
    StatusUpdate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrowdLevel {
    Normal,
    Near,
    Full,
}

struct Connection {
    occupant_id: Option<OccupantId>,
    sender: mpsc::Sender<Notification>,
    broadcast_subscribed: bool,
}

/// Bounded per-connection mailbox. Generous enough that a burst of state
/// changes does not spuriously drop a slow consumer's notifications, while
/// still bounding memory if a connection stops reading entirely.
const CONNECTION_MAILBOX_CAPACITY: usize = 256;

#[derive(Default)]
pub struct NotificationHub {
    connections: DashMap<ConnectionId, Connection>,
    last_crowd_level: Mutex<CrowdLevel>,
}

impl Default for CrowdLevel {
    fn default() -> Self {
        CrowdLevel::Normal
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns the receiving half of its
    /// mailbox. `occupant_id` is `None` for connections that only watch the
    /// broadcast channel (e.g. a lobby display).
    pub fn register(
        &self,
        occupant_id: Option<OccupantId>,
        broadcast_subscribed: bool,
    ) -> (ConnectionId, mpsc::Receiver<Notification>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(CONNECTION_MAILBOX_CAPACITY);
        self.connections.insert(
            id,
            Connection { occupant_id, sender: tx, broadcast_subscribed },
        );
        (id, rx)
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    pub fn broadcast(&self, topic: Topic, payload: serde_json::Value) {
        let notification = Notification { topic, payload };
        for entry in self.connections.iter() {
            if entry.value().broadcast_subscribed {
                let _ = entry.value().sender.try_send(notification.clone());
            }
        }
    }

    pub fn unicast(&self, occupant_id: OccupantId, topic: Topic, payload: serde_json::Value) {
        let notification = Notification { topic, payload };
        for entry in self.connections.iter() {
            if entry.value().occupant_id == Some(occupant_id) {
                let _ = entry.value().sender.try_send(notification.clone());
            }
        }
    }

    /// Broadcasts `occupancy_alert` exactly once per transition into `Near`
    /// or `Full` (`# 4.G`): repeated ticks at the same level are silent.
    pub fn maybe_alert(&self, level: CrowdLevel, payload: serde_json::Value) {
        let mut last = self.last_crowd_level.lock();
        if level != CrowdLevel::Normal && *last != level {
            self.broadcast(Topic::OccupancyAlert, payload);
        }
        *last = level;
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
