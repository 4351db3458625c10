//! Durable event storage behind the ingestion endpoint.
//!
//! The live-distribution core never reads from here except to warm the
//! in-memory buffer at startup.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hook::{FilterOptions, HookEvent, HumanInTheLoopResponse};

/// Where ingested events are persisted. Could be SQLite, Postgres, etc.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist an event, returning it with `id` (and `timestamp` if absent) filled in.
    async fn insert(&self, event: HookEvent) -> Result<HookEvent>;
    /// The `limit` most recent events, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<HookEvent>>;
    /// Distinct source apps, sessions and event types, sorted.
    async fn filter_options(&self) -> Result<FilterOptions>;
    /// Record a human-in-the-loop answer. `None` if the event does not exist.
    async fn respond(&self, id: i64, response: HumanInTheLoopResponse)
    -> Result<Option<HookEvent>>;
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
