use super::{json_col, ReconStore};
use crate::entities::{ImportQueueItem, ImportStatus, StagedImport};
use crate::error::{ReconError, ReconResult};
use crate::types::{Gateway, Timestamp};
use rusqlite::{params, OptionalExtension};

const QUEUE_COLUMNS: &str = "queue_id, staging_id, source, payment, registration,
        registration_id, match_method, match_confidence, status, error,
        generated_payment_id, generated_registration_id, imported_at, created_at";

impl ReconStore {
    // ── Staging ────────────────────────────────────────────────

    pub fn insert_staged(&self, s: &StagedImport) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO staged_imports
             (staging_id, source, raw, received_at, check_count, last_check_at, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                s.staging_id,
                s.source.as_str(),
                serde_json::to_string(&s.raw)?,
                s.received_at,
                s.check_count,
                s.last_check_at,
                s.reason,
            ],
        )?;
        Ok(())
    }

    pub fn find_staged(&self, staging_id: &str) -> ReconResult<Option<StagedImport>> {
        let mut stmt = self.conn.prepare(
            "SELECT staging_id, source, raw, received_at, check_count, last_check_at, reason
             FROM staged_imports WHERE staging_id = ?1",
        )?;
        let staged = stmt
            .query_row(params![staging_id], map_staged_row)
            .optional()?;
        Ok(staged)
    }

    /// Staged imports under the check cap, oldest first.
    pub fn staged_under_cap(&self, max_checks: i64, limit: usize) -> ReconResult<Vec<StagedImport>> {
        let mut stmt = self.conn.prepare(
            "SELECT staging_id, source, raw, received_at, check_count, last_check_at, reason
             FROM staged_imports
             WHERE check_count < ?1
             ORDER BY received_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![max_checks, limit as i64], map_staged_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record one unsuccessful check against a staged import.
    pub fn touch_staged(&self, staging_id: &str, now: Timestamp, reason: &str) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE staged_imports
             SET check_count = check_count + 1, last_check_at = ?2, reason = ?3
             WHERE staging_id = ?1",
            params![staging_id, now, reason],
        )?;
        Ok(())
    }

    /// Deliberate: the staging copy is redundant after a successful import
    /// and is deleted to prevent duplicate display and reprocessing.
    pub fn delete_staged(&self, staging_id: &str) -> ReconResult<()> {
        self.conn.execute(
            "DELETE FROM staged_imports WHERE staging_id = ?1",
            params![staging_id],
        )?;
        Ok(())
    }

    pub fn move_staged_to_failed(
        &self,
        staged: &StagedImport,
        reason: &str,
        now: Timestamp,
    ) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO failed_imports
             (staging_id, source, raw, received_at, failure_reason, failed_at, final_check_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                staged.staging_id,
                staged.source.as_str(),
                serde_json::to_string(&staged.raw)?,
                staged.received_at,
                reason,
                now,
                staged.check_count,
            ],
        )?;
        self.delete_staged(&staged.staging_id)?;
        Ok(())
    }

    pub fn staged_count(&self) -> ReconResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM staged_imports", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn failed_import_count(&self) -> ReconResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM failed_imports", [], |row| row.get(0))
            .map_err(Into::into)
    }

    // ── Import queue ───────────────────────────────────────────

    pub fn insert_queue_item(&self, item: &ImportQueueItem) -> ReconResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO import_queue ({QUEUE_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)"
            ),
            params![
                item.queue_id,
                item.staging_id,
                item.source.as_str(),
                serde_json::to_string(&item.payment)?,
                item.registration
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                item.registration_id,
                item.match_method,
                item.match_confidence,
                item.status.as_str(),
                item.error,
                item.generated_payment_id,
                item.generated_registration_id,
                item.imported_at,
                item.created_at,
            ],
        )?;
        Ok(())
    }

    /// Whether any queue item already references this staged import.
    pub fn queue_item_exists_for_staging(&self, staging_id: &str) -> ReconResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM import_queue WHERE staging_id = ?1",
            params![staging_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_queue_item(&self, queue_id: &str) -> ReconResult<ImportQueueItem> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM import_queue WHERE queue_id = ?1"
        ))?;
        stmt.query_row(params![queue_id], map_queue_row)
            .optional()?
            .ok_or_else(|| ReconError::NotFound {
                entity: "queue item",
                id: queue_id.to_string(),
            })
    }

    /// Atomically claim a pending item for processing. Returns false when
    /// the item is not in 'pending' — already claimed by a competing worker
    /// or already terminal. This is the per-item mutual exclusion.
    pub fn claim_queue_item(&self, queue_id: &str) -> ReconResult<bool> {
        let changed = self.conn.execute(
            "UPDATE import_queue SET status = 'processing'
             WHERE queue_id = ?1 AND status = 'pending'",
            params![queue_id],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_queue_imported(
        &self,
        queue_id: &str,
        payment_id: &str,
        registration_id: &str,
        now: Timestamp,
    ) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE import_queue SET
                status = 'imported', imported_at = ?2,
                generated_payment_id = ?3, generated_registration_id = ?4, error = NULL
             WHERE queue_id = ?1",
            params![queue_id, now, payment_id, registration_id],
        )?;
        Ok(())
    }

    pub fn mark_queue_failed(&self, queue_id: &str, error: &str) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE import_queue SET status = 'failed', error = ?2 WHERE queue_id = ?1",
            params![queue_id, error],
        )?;
        Ok(())
    }

    pub fn pending_queue_items(&self, limit: usize) -> ReconResult<Vec<ImportQueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM import_queue
             WHERE status = 'pending'
             ORDER BY created_at ASC
             LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], map_queue_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn queue_count_by_status(&self, status: ImportStatus) -> ReconResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM import_queue WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

fn map_staged_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StagedImport> {
    Ok(StagedImport {
        staging_id: row.get(0)?,
        source: gateway_col(row, 1)?,
        raw: json_col(row, 2)?,
        received_at: row.get(3)?,
        check_count: row.get(4)?,
        last_check_at: row.get(5)?,
        reason: row.get(6)?,
    })
}

fn map_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportQueueItem> {
    let status_str: String = row.get(8)?;
    let status = ImportStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown import status '{status_str}'").into(),
        )
    })?;
    let registration: Option<String> = row.get(4)?;
    let registration = match registration {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(ImportQueueItem {
        queue_id: row.get(0)?,
        staging_id: row.get(1)?,
        source: gateway_col(row, 2)?,
        payment: json_col(row, 3)?,
        registration,
        registration_id: row.get(5)?,
        match_method: row.get(6)?,
        match_confidence: row.get(7)?,
        status,
        error: row.get(9)?,
        generated_payment_id: row.get(10)?,
        generated_registration_id: row.get(11)?,
        imported_at: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn gateway_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Gateway> {
    let text: String = row.get(idx)?;
    Gateway::parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown gateway '{text}'").into(),
        )
    })
}
