//! Connection registry.
//!
//! Every live WebSocket is represented by a [`ConnectionHandle`] stored in
//! the [`Registry`]. The handle owns the only strong sender of the
//! connection's outbound queue, so removing the handle closes the queue and
//! lets the write pump finish with a Close frame.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use murmur_shared::protocol::ServerEvent;
use murmur_shared::types::{ConnectionId, UserId};

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// The queue was full and the event was discarded.
    Dropped,
    /// The write pump is gone.
    Closed,
}

fn try_enqueue(
    sender: &mpsc::Sender<ServerEvent>,
    connection_id: ConnectionId,
    event: ServerEvent,
) -> Enqueue {
    match sender.try_send(event) {
        Ok(()) => Enqueue::Queued,
        Err(TrySendError::Full(event)) => {
            warn!(
                conn = %connection_id,
                kind = event.kind(),
                "Dropping event for slow connection"
            );
            Enqueue::Dropped
        }
        Err(TrySendError::Closed(_)) => Enqueue::Closed,
    }
}

/// Registry entry for one live connection.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    sender: mpsc::Sender<ServerEvent>,
    dropped: AtomicU64,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            user_id,
            sender,
            dropped: AtomicU64::new(0),
        };
        (handle, receiver)
    }

    fn enqueue(&self, event: ServerEvent) -> Enqueue {
        let outcome = try_enqueue(&self.sender, self.id, event);
        if outcome == Enqueue::Dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Events discarded for this connection because its queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Delivery accounting for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections that belonged to a target user.
    pub attempted: usize,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connection_count: usize,
    pub online_users: usize,
    pub dropped_events: u64,
}

/// The set of live connections of this process.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    dropped_events: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub async fn add(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        info!(
            conn = %handle.id,
            user = %handle.user_id,
            connections = connections.len() + 1,
            "Connection registered"
        );
        connections.insert(handle.id, handle);
    }

    /// Deregister a connection, closing its outbound queue. Returns `false`
    /// if it was already gone.
    pub async fn remove(&self, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.remove(&connection_id) {
            Some(handle) => {
                info!(
                    conn = %connection_id,
                    user = %handle.user_id,
                    dropped = handle.dropped_events(),
                    connections = connections.len(),
                    "Connection removed"
                );
                true
            }
            None => false,
        }
    }

    /// Enqueue `event` on every live connection of every user in `user_ids`.
    /// Never waits on a slow connection.
    pub async fn broadcast_to_users(
        &self,
        event: &ServerEvent,
        user_ids: &[UserId],
    ) -> BroadcastReport {
        let targets: HashSet<&UserId> = user_ids.iter().collect();
        let mut report = BroadcastReport::default();

        let connections = self.connections.read().await;
        for handle in connections.values() {
            if !targets.contains(&handle.user_id) {
                continue;
            }
            report.attempted += 1;
            match handle.enqueue(event.clone()) {
                Enqueue::Queued => report.delivered += 1,
                Enqueue::Dropped => {
                    report.dropped += 1;
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                }
                Enqueue::Closed => {}
            }
        }
        drop(connections);

        debug!(
            kind = event.kind(),
            users = targets.len(),
            attempted = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );
        report
    }

    /// Enqueue `event` on a single connection. An unknown id counts as
    /// [`Enqueue::Closed`].
    pub async fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Enqueue {
        let connections = self.connections.read().await;
        let Some(handle) = connections.get(&connection_id) else {
            return Enqueue::Closed;
        };
        let outcome = handle.enqueue(event);
        if outcome == Enqueue::Dropped {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Remove every connection. Each write pump sends a Close frame and exits.
    pub async fn shutdown(&self) -> usize {
        let mut connections = self.connections.write().await;
        let closed = connections.len();
        connections.clear();
        info!(closed, "Registry shut down");
        closed
    }

    pub async fn stats(&self) -> RegistryStats {
        let connections = self.connections.read().await;
        let online: HashSet<UserId> = connections.values().map(|h| h.user_id).collect();
        RegistryStats {
            connection_count: connections.len(),
            online_users: online.len(),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
