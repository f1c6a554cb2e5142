use super::{json_col, ReconStore};
use crate::entities::Registration;
use crate::error::{ReconError, ReconResult};
use crate::types::{Gateway, Timestamp};
use crate::version_ledger::{ConflictEntry, VersionedMeta};
use rusqlite::{params, OptionalExtension};

const REGISTRATION_COLUMNS: &str = "registration_id, confirmation_number, total_amount_minor,
        currency, customer_email, payment_status, linked_payment_id, matched_at, matched_by,
        tickets, doc, source_created_at, source_updated_at, version_number, version_history,
        conflicts";

impl ReconStore {
    pub fn insert_registration(&self, r: &Registration) -> ReconResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO registrations ({REGISTRATION_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)"
            ),
            params![
                r.registration_id,
                r.confirmation_number,
                r.total_amount_minor,
                r.currency,
                r.customer_email,
                r.payment_status,
                r.linked_payment_id,
                r.matched_at,
                r.matched_by,
                serde_json::to_string(&r.tickets)?,
                serde_json::to_string(&r.doc)?,
                r.meta.source_created_at,
                r.meta.source_updated_at,
                r.meta.version_number,
                serde_json::to_string(&r.meta.version_history)?,
                serde_json::to_string(&r.meta.conflicts)?,
            ],
        )?;
        Ok(())
    }

    /// Replace a registration's observed fields after the version ledger
    /// accepted a newer observation. Link fields stay untouched.
    pub fn update_registration_observation(&self, r: &Registration) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE registrations SET
                confirmation_number = ?2, total_amount_minor = ?3, currency = ?4,
                customer_email = ?5, payment_status = ?6, tickets = ?7, doc = ?8,
                source_created_at = ?9, source_updated_at = ?10, version_number = ?11,
                version_history = ?12, conflicts = ?13
             WHERE registration_id = ?1",
            params![
                r.registration_id,
                r.confirmation_number,
                r.total_amount_minor,
                r.currency,
                r.customer_email,
                r.payment_status,
                serde_json::to_string(&r.tickets)?,
                serde_json::to_string(&r.doc)?,
                r.meta.source_created_at,
                r.meta.source_updated_at,
                r.meta.version_number,
                serde_json::to_string(&r.meta.version_history)?,
                serde_json::to_string(&r.meta.conflicts)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_registration(&self, registration_id: &str) -> ReconResult<Registration> {
        self.find_registration(registration_id)?
            .ok_or_else(|| ReconError::NotFound {
                entity: "registration",
                id: registration_id.to_string(),
            })
    }

    pub fn find_registration(&self, registration_id: &str) -> ReconResult<Option<Registration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE registration_id = ?1"
        ))?;
        let registration = stmt
            .query_row(params![registration_id], map_registration_row)
            .optional()?;
        Ok(registration)
    }

    /// Probe a single dotted field path in the original document for an
    /// exact identifier value. `path` must come from the matcher's
    /// declarative probe tables, never from input.
    pub fn find_registration_id_by_path(
        &self,
        path: &str,
        value: &str,
    ) -> ReconResult<Option<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT registration_id FROM registrations
             WHERE json_extract(doc, '$.{path}') = ?1
             ORDER BY registration_id ASC
             LIMIT 1"
        ))?;
        let id = stmt.query_row(params![value], |row| row.get(0)).optional()?;
        Ok(id)
    }

    /// Fuzzy candidate: exact amount, created within the given window.
    pub fn find_registration_by_amount_window(
        &self,
        amount_minor: i64,
        from: Timestamp,
        to: Timestamp,
    ) -> ReconResult<Option<Registration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations
             WHERE total_amount_minor = ?1
               AND source_created_at >= ?2 AND source_created_at <= ?3
             ORDER BY source_created_at ASC
             LIMIT 1"
        ))?;
        let registration = stmt
            .query_row(params![amount_minor, from, to], map_registration_row)
            .optional()?;
        Ok(registration)
    }

    /// Fuzzy candidate: customer email plus exact amount.
    pub fn find_registration_by_email_amount(
        &self,
        email: &str,
        amount_minor: i64,
    ) -> ReconResult<Option<Registration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations
             WHERE customer_email = ?1 AND total_amount_minor = ?2
             ORDER BY source_created_at ASC
             LIMIT 1"
        ))?;
        let registration = stmt
            .query_row(params![email, amount_minor], map_registration_row)
            .optional()?;
        Ok(registration)
    }

    /// Write the payment link onto a registration. Both the canonical and
    /// the legacy snake_case identifier fields are set in the document so
    /// downstream consumers of either schema generation see the link.
    pub fn set_registration_link(
        &self,
        registration_id: &str,
        payment_id: &str,
        source: Gateway,
        gateway_payment_id: Option<&str>,
        matched_by: &str,
        now: Timestamp,
    ) -> ReconResult<()> {
        let (canonical, legacy) = match source {
            Gateway::Square => ("squarePaymentId", "square_payment_id"),
            Gateway::Stripe => ("stripePaymentIntentId", "stripe_payment_intent_id"),
        };
        self.conn.execute(
            &format!(
                "UPDATE registrations SET
                    linked_payment_id = ?2, matched_at = ?3, matched_by = ?4,
                    doc = json_set(doc, '$.{canonical}', ?5, '$.{legacy}', ?5,
                                   '$.linkedPaymentId', ?2)
                 WHERE registration_id = ?1"
            ),
            params![registration_id, payment_id, now, matched_by, gateway_payment_id],
        )?;
        Ok(())
    }

    /// Registrations carrying a back-link, for the repair sweep.
    pub fn linked_registrations(&self) -> ReconResult<Vec<Registration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations
             WHERE linked_payment_id IS NOT NULL AND linked_payment_id != ''
             ORDER BY registration_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![], map_registration_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn append_registration_conflict(
        &self,
        registration_id: &str,
        conflict: &ConflictEntry,
    ) -> ReconResult<()> {
        let registration = self.get_registration(registration_id)?;
        let mut conflicts = registration.meta.conflicts;
        conflicts.push(conflict.clone());
        self.conn.execute(
            "UPDATE registrations SET conflicts = ?2 WHERE registration_id = ?1",
            params![registration_id, serde_json::to_string(&conflicts)?],
        )?;
        Ok(())
    }

    pub fn delete_registration(&self, registration_id: &str) -> ReconResult<()> {
        self.conn.execute(
            "DELETE FROM registrations WHERE registration_id = ?1",
            params![registration_id],
        )?;
        Ok(())
    }

    pub fn registration_count(&self) -> ReconResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM registrations", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

fn map_registration_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Registration> {
    Ok(Registration {
        registration_id: row.get(0)?,
        confirmation_number: row.get(1)?,
        total_amount_minor: row.get(2)?,
        currency: row.get(3)?,
        customer_email: row.get(4)?,
        payment_status: row.get(5)?,
        linked_payment_id: row.get(6)?,
        matched_at: row.get(7)?,
        matched_by: row.get(8)?,
        tickets: json_col(row, 9)?,
        doc: json_col(row, 10)?,
        meta: VersionedMeta {
            source_created_at: row.get(11)?,
            source_updated_at: row.get(12)?,
            version_number: row.get(13)?,
            version_history: json_col(row, 14)?,
            conflicts: json_col(row, 15)?,
        },
    })
}
