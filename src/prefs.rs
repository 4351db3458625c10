//! Client preferences backed by SQLite.
//!
//! A plain key-value table plus typed accessors for the settings the
//! watcher cares about. Pass `":memory:"` for throwaway stores.

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};

use crate::consts::DEFAULT_MAX_EVENTS;

pub const MAX_EVENTS_KEY: &str = "max_events_to_display";

/// Persistent key-value preference store.
pub struct Preferences {
    conn: Mutex<Connection>,
}

impl Preferences {
    /// Open or create the preferences table at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open preferences database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS preferences (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create preferences table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("preferences lock poisoned"))
    }

    /// Raw stored value, if any.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM preferences WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Upsert.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Stored window size, or the default when absent or unreadable.
    pub fn max_events(&self) -> Result<usize> {
        let Some(raw) = self.get(MAX_EVENTS_KEY)? else {
            return Ok(DEFAULT_MAX_EVENTS);
        };
        match raw.trim().parse::<usize>() {
            Ok(n) => Ok(n.max(1)),
            Err(_) => {
                tracing::warn!(value = %raw, "ignoring unreadable {MAX_EVENTS_KEY}");
                Ok(DEFAULT_MAX_EVENTS)
            }
        }
    }

    /// Persist a window size (at least 1). Returns the stored value.
    pub fn set_max_events(&self, max: usize) -> Result<usize> {
        let max = max.max(1);
        self.set(MAX_EVENTS_KEY, &max.to_string())?;
        Ok(max)
    }
}
