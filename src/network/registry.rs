//! Connection Registry
//!
//! Live connections and the ordered fan-out of round events to them.
//!
//! Each connection remembers the sequence of the last engine event its
//! snapshot already reflects. Fan-out skips anything at or below that mark,
//! so a late joiner never sees an event twice or out of order.
//!
//! A connection whose outbound queue is full or closed is evicted rather
//! than fed a gap.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::game::engine::EngineHandle;
use crate::game::history::HistoryEntry;
use crate::game::state::{RoundPhase, RoundSnapshot};
use crate::network::protocol::ServerMessage;

/// Unique connection identifier.
pub type ConnectionId = [u8; 16];

/// Short hex form of a connection id for logs.
pub fn short_id(id: &ConnectionId) -> String {
    hex::encode(&id[..4])
}

/// Messages that bring a client up to date: phase, history, then the live
/// multiplier while driving. No tick replay.
pub fn snapshot_messages(snapshot: &RoundSnapshot, history: Vec<HistoryEntry>) -> Vec<ServerMessage> {
    let mut messages = vec![
        ServerMessage::GameState {
            state: snapshot.phase,
            round_seq: snapshot.seq,
        },
        ServerMessage::History { items: history },
    ];
    if snapshot.phase == RoundPhase::Driving {
        messages.push(ServerMessage::Multiplier {
            value: snapshot.multiplier.as_f64(),
        });
    }
    messages
}

/// A registered connection.
struct Connection {
    /// Outbound queue to the socket writer.
    sender: mpsc::Sender<ServerMessage>,
    /// Last engine event already reflected for this connection.
    since: u64,
    /// Raised when the registry drops the connection.
    evicted: Arc<Notify>,
    /// Peer address.
    addr: SocketAddr,
    /// Connection time.
    connected_at: Instant,
}

/// Result of [`ConnectionRegistry::register`].
pub struct Registration {
    /// Round view sent to the client.
    pub snapshot: RoundSnapshot,
    /// Notified if the registry evicts the connection.
    pub evicted: Arc<Notify>,
}

/// All live connections.
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Connection>>,
    engine: EngineHandle,
}

impl ConnectionRegistry {
    /// Create an empty registry reading snapshots from `engine`.
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            engine,
        }
    }

    /// Register a connection and queue its snapshot.
    ///
    /// The registry lock is held across the engine snapshot so that fan-out
    /// cannot deliver an event the snapshot misses.
    pub async fn register(
        &self,
        id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Registration {
        let mut connections = self.connections.write().await;
        let (snapshot, history, as_of) = self.engine.snapshot_with_history().await;
        let evicted = Arc::new(Notify::new());

        let mut healthy = true;
        for message in snapshot_messages(&snapshot, history) {
            if sender.try_send(message).is_err() {
                healthy = false;
                break;
            }
        }

        if healthy {
            connections.insert(
                id,
                Connection {
                    sender,
                    since: as_of,
                    evicted: evicted.clone(),
                    addr,
                    connected_at: Instant::now(),
                },
            );
            debug!("Registered {} from {} at event {}", short_id(&id), addr, as_of);
        } else {
            warn!("Outbound queue for {} too small for snapshot", short_id(&id));
            evicted.notify_one();
        }

        Registration { snapshot, evicted }
    }

    /// Remove a connection. Returns whether it was present.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        match self.connections.write().await.remove(id) {
            Some(conn) => {
                debug!(
                    "Unregistered {} ({}) after {:?}",
                    short_id(id),
                    conn.addr,
                    conn.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Queue a message for a single connection. Returns false if it is gone.
    pub async fn send_to(&self, id: &ConnectionId, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(id) {
            Some(conn) => conn.sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Deliver engine event `seq` to every connection not already past it.
    pub async fn broadcast(&self, seq: u64, message: ServerMessage) {
        let failed: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, conn)| seq > conn.since)
                .filter(|(_, conn)| conn.sender.try_send(message.clone()).is_err())
                .map(|(id, _)| *id)
                .collect()
        };

        if !failed.is_empty() {
            self.evict(&failed).await;
        }
    }

    /// Resend a fresh snapshot to everyone, after the fan-out fell behind.
    pub async fn resync_all(&self) {
        let failed: Vec<ConnectionId> = {
            let mut connections = self.connections.write().await;
            let (snapshot, history, as_of) = self.engine.snapshot_with_history().await;
            let messages = snapshot_messages(&snapshot, history);

            let mut failed = Vec::new();
            for (id, conn) in connections.iter_mut() {
                conn.since = as_of;
                if messages.iter().any(|m| conn.sender.try_send(m.clone()).is_err()) {
                    failed.push(*id);
                }
            }
            failed
        };

        if !failed.is_empty() {
            self.evict(&failed).await;
        }
    }

    async fn evict(&self, ids: &[ConnectionId]) {
        let mut connections = self.connections.write().await;
        for id in ids {
            if let Some(conn) = connections.remove(id) {
                info!("Evicting slow connection {} ({})", short_id(id), conn.addr);
                conn.evicted.notify_one();
            }
        }
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connections are live.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
