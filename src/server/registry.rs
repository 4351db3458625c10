//! The set of live connections and the broadcast fan-out over it.
//!
//! A broadcast works on a snapshot taken under the read lock; sends run
//! outside the lock, concurrently, each under the registry's send timeout.
//! Any connection whose send fails or times out is unregistered afterwards.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};

use crate::consts::DEFAULT_SEND_TIMEOUT;
use crate::hook::HookEvent;
use crate::protocol::ServerMessage;

pub type ConnectionId = u64;

/// One live channel to a client. Sends are fallible and may be slow.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;
    async fn send(&self, frame: &str) -> Result<()>;
    /// Called once the registry has evicted this connection. The owner of
    /// the transport must tear it down.
    fn close(&self) {}
}

/// A connection backed by a bounded queue drained by the socket writer task.
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    closed: watch::Sender<bool>,
}

impl ChannelConnection {
    /// Wrap the sending half of a writer task's queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        let (closed, _) = watch::channel(false);
        Self { id, tx, closed }
    }

    /// Flips to `true` when the registry evicts this connection.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: &str) -> Result<()> {
        if self.is_closed() {
            bail!("connection {} was evicted", self.id);
        }
        self.tx
            .send(frame.to_owned())
            .await
            .map_err(|_| anyhow!("connection {} is closed", self.id))
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

/// What happened during one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Live connections. RwLock: broadcasts snapshot under read, mutations take write.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<dyn Connection>>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}

impl ConnectionRegistry {
    /// An empty registry whose broadcasts give each send `send_timeout`.
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    /// Hand out an id for a connection about to be registered.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a connection to the live set. Re-registering an id replaces it.
    pub async fn register(&self, connection: Arc<dyn Connection>) {
        let id = connection.id();
        self.connections.write().await.insert(id, connection);
        tracing::debug!(connection = id, "registered");
    }

    /// Remove a connection. Absent ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        if self.connections.write().await.remove(&id).is_some() {
            tracing::debug!(connection = id, "unregistered");
        }
    }

    /// Deadline applied to each send during a broadcast.
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Whether `id` is currently registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Send `event` to every registered connection, evicting the ones that fail.
    pub async fn broadcast(&self, event: &HookEvent) -> BroadcastReport {
        let message = ServerMessage::Event {
            data: event.clone(),
        };
        match message.encode() {
            Ok(frame) => self.broadcast_frame(&frame).await,
            Err(e) => {
                tracing::warn!(error = %e, "dropping event that could not be encoded");
                BroadcastReport::default()
            }
        }
    }

    /// Fan an already-encoded frame out to a snapshot of the registry.
    /// Evicted connections are removed and told to close.
    pub async fn broadcast_frame(&self, frame: &str) -> BroadcastReport {
        let snapshot: Vec<Arc<dyn Connection>> =
            self.connections.read().await.values().cloned().collect();
        let timeout = self.send_timeout;

        let sends = snapshot.iter().map(|connection| async move {
            let outcome = match tokio::time::timeout(timeout, connection.send(frame)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("send timed out".to_string()),
            };
            (connection, outcome)
        });
        let results = futures::future::join_all(sends).await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (connection, outcome) in results {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    let id = connection.id();
                    tracing::info!(connection = id, %reason, "evicting connection after failed send");
                    report.evicted.push(id);
                    failed.push(connection);
                }
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.write().await;
            for connection in failed {
                connections.remove(&connection.id());
                connection.close();
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.next_id();
        let connection: Arc<dyn Connection> = Arc::new(ChannelConnection::new(id, tx));

        registry.register(Arc::clone(&connection)).await;
        registry.register(connection).await;

        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_absent_is_ok() {
        let registry = ConnectionRegistry::default();
        registry.unregister(42).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn channel_connection_delivers_frames() {
        let registry = ConnectionRegistry::default();
        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.next_id();
        registry
            .register(Arc::new(ChannelConnection::new(id, tx)))
            .await;

        let report = registry.broadcast_frame("hello").await;
        assert_eq!(report.delivered, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn dropped_receiver_is_evicted() {
        let registry = ConnectionRegistry::default();
        let (tx, rx) = mpsc::channel(4);
        let id = registry.next_id();
        registry
            .register(Arc::new(ChannelConnection::new(id, tx)))
            .await;
        drop(rx);

        let report = registry.broadcast_frame("hello").await;
        assert_eq!(report.evicted, vec![id]);
        assert!(!registry.contains(id).await);
    }

    #[tokio::test]
    async fn full_queue_times_out_and_is_evicted() {
        let registry = ConnectionRegistry::new(Duration::from_millis(20));
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.next_id();
        registry
            .register(Arc::new(ChannelConnection::new(id, tx)))
            .await;

        assert_eq!(registry.broadcast_frame("one").await.delivered, 1);
        let report = registry.broadcast_frame("two").await;
        assert_eq!(report.evicted, vec![id]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn eviction_signals_close() {
        let registry = ConnectionRegistry::new(Duration::from_millis(20));
        let (tx, _rx) = mpsc::channel(1);
        let id = registry.next_id();
        let connection = Arc::new(ChannelConnection::new(id, tx));
        let mut closed = connection.closed();
        registry.register(connection.clone()).await;

        registry.broadcast_frame("one").await;
        assert!(!connection.is_closed());
        registry.broadcast_frame("two").await;

        tokio::time::timeout(Duration::from_secs(1), closed.wait_for(|c| *c))
            .await
            .expect("close was never signalled")
            .unwrap();
        assert!(connection.send("three").await.is_err());
    }

    #[test]
    fn ids_are_unique() {
        let registry = ConnectionRegistry::default();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }
}
