//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call store methods — they never execute SQL directly.

use crate::error::ReconResult;
use crate::event::{event_type_name, EventLogEntry, ReconEvent};
use crate::types::Timestamp;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;

mod inventory;
mod payments;
mod queue;
mod registrations;

pub struct ReconStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ReconStore {
    pub fn open(path: &str) -> ReconResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new isolated database.
    pub fn reopen(&self) -> ReconResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReconResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_inventory.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_import_queue.sql"))?;
        Ok(())
    }

    /// Begin a transaction on this connection. All store calls made while
    /// the returned guard is live participate in it; dropping the guard
    /// without commit() rolls everything back.
    pub fn begin(&self) -> ReconResult<rusqlite::Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(
        &self,
        component: &str,
        event: &ReconEvent,
        now: Timestamp,
    ) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (occurred_at, component, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                now,
                component,
                event_type_name(event),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(())
    }

    pub fn events_by_type(&self, event_type: &str) -> ReconResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_at, component, event_type, payload
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    occurred_at: row.get(1)?,
                    component: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> ReconResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
                params![event_type],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

/// Decode a JSON text column inside a row mapper, surfacing decode failures
/// as rusqlite conversion errors so query_map can propagate them.
pub(crate) fn json_col<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
