use super::{json_col, ReconStore};
use crate::entities::{Payment, PaymentStatus};
use crate::error::{ReconError, ReconResult};
use crate::types::{Gateway, Timestamp};
use crate::version_ledger::{ConflictEntry, VersionedMeta};
use rusqlite::{params, OptionalExtension};

const PAYMENT_COLUMNS: &str = "payment_id, source, square_payment_id, stripe_payment_intent_id,
        transaction_id, amount_minor, currency, status, customer_email, customer_name,
        matched_registration_id, match_method, match_confidence, matched_by, matched_at,
        invoice_id, superseded, source_created_at, source_updated_at, version_number,
        version_history, conflicts, raw";

impl ReconStore {
    pub fn insert_payment(&self, p: &Payment) -> ReconResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO payments ({PAYMENT_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)"
            ),
            params![
                p.payment_id,
                p.source.as_str(),
                p.square_payment_id,
                p.stripe_payment_intent_id,
                p.transaction_id,
                p.amount_minor,
                p.currency,
                p.status.as_str(),
                p.customer_email,
                p.customer_name,
                p.matched_registration_id,
                p.match_method,
                p.match_confidence,
                p.matched_by,
                p.matched_at,
                p.invoice_id,
                if p.superseded { 1 } else { 0 },
                p.meta.source_created_at,
                p.meta.source_updated_at,
                p.meta.version_number,
                serde_json::to_string(&p.meta.version_history)?,
                serde_json::to_string(&p.meta.conflicts)?,
                serde_json::to_string(&p.raw)?,
            ],
        )?;
        Ok(())
    }

    /// Replace a payment's observed fields after the version ledger accepted
    /// a newer observation. Link fields are not touched here — they are
    /// owned by the matcher and import queue.
    pub fn update_payment_observation(&self, p: &Payment) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE payments SET
                square_payment_id = ?2, stripe_payment_intent_id = ?3, transaction_id = ?4,
                amount_minor = ?5, currency = ?6, status = ?7,
                customer_email = ?8, customer_name = ?9,
                source_created_at = ?10, source_updated_at = ?11, version_number = ?12,
                version_history = ?13, conflicts = ?14, raw = ?15
             WHERE payment_id = ?1",
            params![
                p.payment_id,
                p.square_payment_id,
                p.stripe_payment_intent_id,
                p.transaction_id,
                p.amount_minor,
                p.currency,
                p.status.as_str(),
                p.customer_email,
                p.customer_name,
                p.meta.source_created_at,
                p.meta.source_updated_at,
                p.meta.version_number,
                serde_json::to_string(&p.meta.version_history)?,
                serde_json::to_string(&p.meta.conflicts)?,
                serde_json::to_string(&p.raw)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_payment(&self, payment_id: &str) -> ReconResult<Payment> {
        self.find_payment(payment_id)?
            .ok_or_else(|| ReconError::NotFound {
                entity: "payment",
                id: payment_id.to_string(),
            })
    }

    pub fn find_payment(&self, payment_id: &str) -> ReconResult<Option<Payment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = ?1"
        ))?;
        let payment = stmt
            .query_row(params![payment_id], map_payment_row)
            .optional()?;
        Ok(payment)
    }

    /// Look a payment up by any of its gateway-native or alternate ids.
    pub fn find_payment_by_gateway_id(
        &self,
        source: Gateway,
        id: &str,
    ) -> ReconResult<Option<Payment>> {
        let id_column = match source {
            Gateway::Square => "square_payment_id",
            Gateway::Stripe => "stripe_payment_intent_id",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE source = ?1 AND ({id_column} = ?2 OR transaction_id = ?2)
               AND superseded = 0
             LIMIT 1"
        ))?;
        let payment = stmt
            .query_row(params![source.as_str(), id], map_payment_row)
            .optional()?;
        Ok(payment)
    }

    /// Unmatched, uninvoiced payments, oldest observation first.
    pub fn unmatched_payments(&self, limit: usize) -> ReconResult<Vec<Payment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE (matched_registration_id IS NULL OR matched_registration_id = '')
               AND invoice_id IS NULL
               AND superseded = 0
             ORDER BY source_created_at ASC
             LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], map_payment_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Payments carrying a forward link, for the repair sweep.
    pub fn matched_payments(&self) -> ReconResult<Vec<Payment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE matched_registration_id IS NOT NULL AND matched_registration_id != ''
               AND superseded = 0
             ORDER BY payment_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![], map_payment_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_payment_match(
        &self,
        payment_id: &str,
        registration_id: &str,
        method: &str,
        confidence: i64,
        matched_by: &str,
        now: Timestamp,
    ) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE payments SET
                matched_registration_id = ?2, match_method = ?3, match_confidence = ?4,
                matched_by = ?5, matched_at = ?6
             WHERE payment_id = ?1",
            params![payment_id, registration_id, method, confidence, matched_by, now],
        )?;
        Ok(())
    }

    /// Attach a conflict entry to the stored (winning) payment.
    pub fn append_payment_conflict(
        &self,
        payment_id: &str,
        conflict: &ConflictEntry,
    ) -> ReconResult<()> {
        let payment = self.get_payment(payment_id)?;
        let mut conflicts = payment.meta.conflicts;
        conflicts.push(conflict.clone());
        self.conn.execute(
            "UPDATE payments SET conflicts = ?2 WHERE payment_id = ?1",
            params![payment_id, serde_json::to_string(&conflicts)?],
        )?;
        Ok(())
    }

    /// Record an issued invoice against a payment; the match becomes
    /// read-only to automated processes from this point.
    pub fn set_payment_invoice(&self, payment_id: &str, invoice_id: &str) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE payments SET invoice_id = ?2 WHERE payment_id = ?1",
            params![payment_id, invoice_id],
        )?;
        Ok(())
    }

    pub fn payment_count(&self) -> ReconResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM payments", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

fn map_payment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    let source_str: String = row.get(1)?;
    let source = Gateway::parse(&source_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown gateway '{source_str}'").into(),
        )
    })?;
    let status_str: String = row.get(7)?;
    Ok(Payment {
        payment_id: row.get(0)?,
        source,
        square_payment_id: row.get(2)?,
        stripe_payment_intent_id: row.get(3)?,
        transaction_id: row.get(4)?,
        amount_minor: row.get(5)?,
        currency: row.get(6)?,
        status: PaymentStatus::parse_loose(&status_str),
        customer_email: row.get(8)?,
        customer_name: row.get(9)?,
        matched_registration_id: row.get(10)?,
        match_method: row.get(11)?,
        match_confidence: row.get(12)?,
        matched_by: row.get(13)?,
        matched_at: row.get(14)?,
        invoice_id: row.get(15)?,
        superseded: row.get::<_, i64>(16)? != 0,
        meta: VersionedMeta {
            source_created_at: row.get(17)?,
            source_updated_at: row.get(18)?,
            version_number: row.get(19)?,
            version_history: json_col(row, 20)?,
            conflicts: json_col(row, 21)?,
        },
        raw: json_col(row, 22)?,
    })
}
