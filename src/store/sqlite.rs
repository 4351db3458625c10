use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Mutex, MutexGuard};

use super::{EventStore, now_millis};
use crate::hook::{
    FilterOptions, HitlState, HookEvent, HumanInTheLoopResponse, HumanInTheLoopStatus,
};

const HITL_STATUS_FIELD: &str = "humanInTheLoopStatus";

/// SQLite-backed event store. The full event is kept as JSON; the identifying
/// columns are duplicated for filtering.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open or create the events table. Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open event database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                source_app      TEXT NOT NULL,
                session_id      TEXT NOT NULL,
                hook_event_type TEXT NOT NULL,
                timestamp       INTEGER NOT NULL,
                body            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_source_app ON events(source_app);
            CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(hook_event_type);",
        )
        .context("failed to create events table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("event store lock poisoned"))
    }
}

fn decode(id: i64, body: &str) -> Result<HookEvent> {
    let mut event: HookEvent =
        serde_json::from_str(body).with_context(|| format!("corrupt event body for id {id}"))?;
    event.id = Some(id);
    Ok(event)
}

fn distinct(conn: &Connection, column: &str) -> Result<Vec<String>> {
    let sql = format!("SELECT DISTINCT {column} FROM events ORDER BY {column} ASC");
    let mut stmt = conn.prepare(&sql)?;
    let values = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert(&self, mut event: HookEvent) -> Result<HookEvent> {
        event.id = None;
        let timestamp = *event.timestamp.get_or_insert_with(now_millis);
        let body = serde_json::to_string(&event)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO events (source_app, session_id, hook_event_type, timestamp, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.source_app,
                event.session_id,
                event.hook_event_type,
                timestamp,
                body
            ],
        )
        .context("failed to insert event")?;
        event.id = Some(conn.last_insert_rowid());
        Ok(event)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HookEvent>> {
        let conn = self.conn()?;
        // Newest `limit` rows, returned in chronological order
        let mut stmt = conn.prepare(
            "SELECT id, body FROM (
                SELECT id, body FROM events ORDER BY id DESC LIMIT ?1
            ) ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter().map(|(id, body)| decode(*id, body)).collect()
    }

    async fn filter_options(&self) -> Result<FilterOptions> {
        let conn = self.conn()?;
        Ok(FilterOptions {
            source_apps: distinct(&conn, "source_app")?,
            session_ids: distinct(&conn, "session_id")?,
            hook_event_types: distinct(&conn, "hook_event_type")?,
        })
    }

    async fn respond(
        &self,
        id: i64,
        mut response: HumanInTheLoopResponse,
    ) -> Result<Option<HookEvent>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM events WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(body) = body else {
            return Ok(None);
        };
        let mut event = decode(id, &body)?;
        let responded_at = *response.responded_at.get_or_insert_with(now_millis);
        let status = HumanInTheLoopStatus {
            status: HitlState::Responded,
            responded_at: Some(responded_at),
            response: Some(response),
        };
        event
            .extra
            .insert(HITL_STATUS_FIELD.to_string(), serde_json::to_value(&status)?);

        let mut stored = event.clone();
        stored.id = None;
        conn.execute(
            "UPDATE events SET body = ?1 WHERE id = ?2",
            params![serde_json::to_string(&stored)?, id],
        )
        .context("failed to record response")?;
        Ok(Some(event))
    }
}
