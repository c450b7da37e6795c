//! Live connection directory
//!
//! Maps responders and missions to the connections registered for them so
//! the notifier can address either a whole mission or individual responders.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Process-local connection identifier
pub type ConnectionId = u64;

/// Outbound text-frame queue of one connection
pub type Outbound = mpsc::UnboundedSender<String>;

struct Connection {
    responder_id: String,
    mission_id: String,
    tx: Outbound,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    by_responder: HashMap<String, HashSet<ConnectionId>>,
    by_mission: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    fn detach(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;

        if let Some(ids) = self.by_responder.get_mut(&conn.responder_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_responder.remove(&conn.responder_id);
            }
        }
        if let Some(ids) = self.by_mission.get_mut(&conn.mission_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_mission.remove(&conn.mission_id);
            }
        }
        Some(conn)
    }

    fn send(&self, ids: impl IntoIterator<Item = ConnectionId>, frame: &str) -> usize {
        let mut delivered = 0;
        for id in ids {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            match conn.tx.send(frame.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    connection_id = id,
                    responder_id = %conn.responder_id,
                    "Dropping frame for closed connection"
                ),
            }
        }
        delivered
    }
}

/// Registered connections indexed by responder and mission
#[derive(Default)]
pub struct ConnectionDirectory {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl ConnectionDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a responder within a mission
    pub async fn register(&self, responder_id: &str, mission_id: &str, tx: Outbound) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.write().await;

        registry.connections.insert(
            id,
            Connection {
                responder_id: responder_id.to_string(),
                mission_id: mission_id.to_string(),
                tx,
            },
        );
        registry
            .by_responder
            .entry(responder_id.to_string())
            .or_default()
            .insert(id);
        registry
            .by_mission
            .entry(mission_id.to_string())
            .or_default()
            .insert(id);

        debug!(connection_id = id, responder_id, mission_id, "Connection registered");
        id
    }

    /// Remove a connection everywhere; returns `false` if it was unknown
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.registry.write().await.detach(id);
        if let Some(conn) = &removed {
            debug!(
                connection_id = id,
                responder_id = %conn.responder_id,
                mission_id = %conn.mission_id,
                "Connection unregistered"
            );
        }
        removed.is_some()
    }

    /// Send a frame to every connection in a mission
    pub async fn send_to_mission(&self, mission_id: &str, frame: &str) -> usize {
        let registry = self.registry.read().await;
        let ids: Vec<ConnectionId> = registry
            .by_mission
            .get(mission_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        registry.send(ids, frame)
    }

    /// Send a frame to every connection of the listed responders
    pub async fn send_to_responders(&self, responder_ids: &[String], frame: &str) -> usize {
        let registry = self.registry.read().await;
        let ids: HashSet<ConnectionId> = responder_ids
            .iter()
            .filter_map(|r| registry.by_responder.get(r))
            .flat_map(|ids| ids.iter().copied())
            .collect();
        registry.send(ids, frame)
    }

    /// Total registered connections
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    /// Connections registered for a mission
    pub async fn mission_connections(&self, mission_id: &str) -> usize {
        self.registry
            .read()
            .await
            .by_mission
            .get(mission_id)
            .map_or(0, HashSet::len)
    }

    /// Connections registered for a responder
    pub async fn responder_connections(&self, responder_id: &str) -> usize {
        self.registry
            .read()
            .await
            .by_responder
            .get(responder_id)
            .map_or(0, HashSet::len)
    }
}
