use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::ServerConfig;
use super::buffer::EventBuffer;
use super::registry::{BroadcastReport, Connection, ConnectionRegistry};
use super::subscription::Subscription;
use crate::hook::HookEvent;
use crate::store::EventStore;

/// Owns the server's shared state: history buffer, live registry, and the
/// durable store that feeds them. One per server process.
pub struct Hub {
    buffer: RwLock<EventBuffer>,
    registry: ConnectionRegistry,
    store: Arc<dyn EventStore>,
}

impl Hub {
    pub fn new(store: Arc<dyn EventStore>, config: &ServerConfig) -> Self {
        Self {
            buffer: RwLock::new(EventBuffer::new(config.buffer_capacity)),
            registry: ConnectionRegistry::new(config.send_timeout),
            store,
        }
    }

    /// The live connection set.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The durable store behind ingestion.
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Seed the buffer from the store so a restarted server still has history.
    pub async fn warm(&self) -> Result<usize> {
        let mut buffer = self.buffer.write().await;
        let history = self
            .store
            .recent(buffer.capacity())
            .await
            .context("failed to load history for warm start")?;
        let loaded = history.len();
        buffer.extend(history);
        Ok(loaded)
    }

    /// Persist a new event, then hand it to the live path.
    /// Nothing is broadcast if persistence fails.
    pub async fn ingest(&self, event: HookEvent) -> Result<HookEvent> {
        let stored = self.store.insert(event).await?;
        let report = self.publish(stored.clone()).await;
        tracing::debug!(
            id = ?stored.id,
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "event published"
        );
        Ok(stored)
    }

    /// Append to the history buffer and broadcast to every live connection.
    ///
    /// The write lock is held until every send has been queued or timed out,
    /// so a concurrent handshake sees the event either in its `initial`
    /// batch or as a later `event` frame, never neither.
    pub async fn publish(&self, event: HookEvent) -> BroadcastReport {
        let mut buffer = self.buffer.write().await;
        buffer.append(event.clone());
        self.registry.broadcast(&event).await
    }

    /// Run one inbound frame through a connection's handshake state and
    /// queue the replies on `connection`, all under the buffer read lock.
    /// Fails if a reply cannot be queued within the send timeout.
    pub async fn handle_frame(
        &self,
        subscription: &mut Subscription,
        text: &str,
        connection: &dyn Connection,
    ) -> Result<()> {
        let buffer = self.buffer.read().await;
        for reply in subscription.handle(text, &buffer) {
            let frame = match reply.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(connection = connection.id(), error = %e, kind = reply.kind(), "failed to encode reply");
                    continue;
                }
            };
            tokio::time::timeout(self.registry.send_timeout(), connection.send(&frame))
                .await
                .map_err(|_| anyhow!("`{}` reply timed out", reply.kind()))?
                .with_context(|| format!("`{}` reply could not be sent", reply.kind()))?;
        }
        Ok(())
    }

    /// Events currently held in the history buffer.
    pub async fn buffered(&self) -> usize {
        self.buffer.read().await.len()
    }
}
