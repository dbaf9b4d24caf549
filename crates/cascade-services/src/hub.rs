//! Registry of live client connections.
//!
//! The transport (WebSocket today) owns each connection. It registers the
//! connection with the coordinator on connect and removes it on close; the
//! hub only keeps a shared handle for broadcasts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use cascade_core::wire::{ClientMessage, ServerMessage};

/// Stable identifier for a connection, unique within one process.
pub type ConnId = u64;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} closed")]
    Closed(ConnId),
    #[error("connection {0} is not keeping up")]
    Full(ConnId),
    #[error("send to connection {id} failed: {reason}")]
    Transport { id: ConnId, reason: String },
}

/// A single client connection as seen by the coordinator.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnId;

    /// Deliver one message to this connection only.
    async fn send(&self, msg: ServerMessage) -> Result<(), SendError>;
}

/// Events the transport reports for a connection.
///
/// This is the full set of things a client can cause; the coordinator
/// matches on it exhaustively.
#[derive(Debug, Clone)]
pub enum Inbound {
    Connect,
    Message(ClientMessage),
    Disconnect,
}

// ── Channel-backed connection ────────────────────────────────────────────────

/// Messages a connection may have queued before it counts as stalled.
pub const OUTBOUND_QUEUE: usize = 256;

/// Connection whose outbound side is a bounded channel.
///
/// The WebSocket transport drains the receiver into the socket; tests read
/// it directly. A send never waits: a full queue fails that send.
pub struct ChannelConnection {
    id: ConnId,
    tx: mpsc::Sender<ServerMessage>,
}

impl ChannelConnection {
    pub fn new(id: ConnId) -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        Self::with_capacity(id, OUTBOUND_QUEUE)
    }

    pub fn with_capacity(id: ConnId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { id, tx }), rx)
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> ConnId {
        self.id
    }

    async fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full(self.id),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(self.id),
        })
    }
}

// ── Hub ───────────────────────────────────────────────────────────────────────

/// Shared registry of connections. Clones share the same table.
#[derive(Clone, Default)]
pub struct Hub {
    connections: Arc<DashMap<ConnId, Arc<dyn Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection.
    pub fn next_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn register(&self, conn: Arc<dyn Connection>) {
        let id = conn.id();
        self.connections.insert(id, conn);
        tracing::debug!(conn = id, total = self.connections.len(), "connection registered");
    }

    pub fn unregister(&self, id: ConnId) {
        if self.connections.remove(&id).is_some() {
            tracing::debug!(conn = id, total = self.connections.len(), "connection removed");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Send `msg` to every registered connection concurrently.
    ///
    /// Returns the number of connections that accepted the message. A
    /// failing connection is logged and skipped.
    pub async fn broadcast(&self, msg: ServerMessage) -> usize {
        // Snapshot first so no map shard is locked across an await.
        let targets: Vec<Arc<dyn Connection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let topic = msg.topic();
        let sends = targets.iter().map(|conn| {
            let msg = msg.clone();
            async move {
                match conn.send(msg).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(conn = conn.id(), topic, error = %e, "broadcast send failed");
                        false
                    }
                }
            }
        });
        let delivered = futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        tracing::trace!(topic, delivered, total = targets.len(), "broadcast done");
        delivered
    }
}
