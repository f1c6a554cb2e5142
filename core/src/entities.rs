//! Entity model: payments, registrations with embedded tickets, sellable
//! items, staged imports and queue items.
//!
//! Raw gateway payloads are decoded into typed records exactly once, at the
//! from_raw boundaries in this module. Implicit defaults (ticket status
//! "sold", quantity 1) are filled here and nowhere else.

use crate::types::{EntityId, Gateway, Timestamp};
use crate::version_ledger::VersionedMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Payment ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Map gateway-native status strings onto the canonical set.
    /// Square reports COMPLETED, Stripe reports succeeded; both mean paid.
    pub fn parse_loose(s: &str) -> PaymentStatus {
        match s.to_ascii_lowercase().as_str() {
            "paid" | "completed" | "succeeded" | "captured" => PaymentStatus::Paid,
            "failed" | "canceled" | "cancelled" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Pending,
        }
    }
}

/// A gateway-sourced money movement. Never hard-deleted; superseded copies
/// are flagged instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: EntityId,
    pub source: Gateway,
    /// Gateway-native identifiers. A Square id and a Stripe id are distinct
    /// fields; exactly one is set per payment.
    pub square_payment_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    /// Alternate/legacy identifier (e.g. the Square order id).
    pub transaction_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,

    pub matched_registration_id: Option<EntityId>,
    pub match_method: Option<String>,
    pub match_confidence: Option<i64>,
    pub matched_by: Option<String>,
    pub matched_at: Option<Timestamp>,
    pub invoice_id: Option<String>,

    pub superseded: bool,
    pub meta: VersionedMeta,
    pub raw: Value,
}

impl Payment {
    /// Decode a raw gateway payload. Field fallbacks cover the observed
    /// schema drift across upstream exports.
    pub fn from_raw(payment_id: EntityId, payload: &Value, source: Gateway, meta: VersionedMeta) -> Payment {
        let gateway_id = str_field(payload, &["paymentId", "payment_id", "id"]);
        let transaction_id =
            str_field(payload, &["transactionId", "transaction_id", "orderId", "order_id"]);
        let (square_payment_id, stripe_payment_intent_id) = match source {
            Gateway::Square => (gateway_id.clone(), None),
            Gateway::Stripe => (None, gateway_id.clone()),
        };

        Payment {
            payment_id,
            source,
            square_payment_id,
            stripe_payment_intent_id,
            transaction_id: transaction_id.filter(|t| Some(t) != gateway_id.as_ref()),
            amount_minor: amount_minor(payload),
            currency: str_field(payload, &["currency"])
                .or_else(|| {
                    payload
                        .get("amountMoney")
                        .and_then(|m| m.get("currency"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "AUD".to_string()),
            status: str_field(payload, &["status"])
                .map(|s| PaymentStatus::parse_loose(&s))
                .unwrap_or(PaymentStatus::Pending),
            customer_email: str_field(
                payload,
                &["customerEmail", "customer_email", "buyerEmailAddress"],
            ),
            customer_name: str_field(payload, &["customerName", "customer_name"]),
            matched_registration_id: None,
            match_method: None,
            match_confidence: None,
            matched_by: None,
            matched_at: None,
            invoice_id: None,
            superseded: false,
            meta,
            raw: payload.clone(),
        }
    }

    /// The gateway-native identifier for this payment's source.
    pub fn gateway_payment_id(&self) -> Option<&str> {
        match self.source {
            Gateway::Square => self.square_payment_id.as_deref(),
            Gateway::Stripe => self.stripe_payment_intent_id.as_deref(),
        }
    }

    /// Candidate identifier values for matching, in extraction-rule order:
    /// the gateway-native id first, then the alternate id when distinct.
    pub fn candidate_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Some(id) = self.gateway_payment_id() {
            ids.push(id);
        }
        if let Some(txn) = self.transaction_id.as_deref() {
            if !ids.contains(&txn) {
                ids.push(txn);
            }
        }
        ids
    }

    /// A manual match or an invoiced match is read-only to automated
    /// processes.
    pub fn protection_reason(&self) -> Option<&'static str> {
        if self.matched_by.as_deref() == Some("manual") {
            return Some("matched manually by a reviewer");
        }
        if self.invoice_id.is_some() {
            return Some("match is attached to an issued invoice");
        }
        None
    }

    /// A registration id embedded in the gateway payload's metadata, when
    /// the booking flow passed one through.
    pub fn metadata_registration_id(&self) -> Option<String> {
        let meta = self.raw.get("metadata").unwrap_or(&self.raw);
        str_field(meta, &["registrationId", "registration_id"])
    }
}

// ── Ticket ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Sold,
    Reserved,
    Cancelled,
    Transferred,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Sold => "sold",
            TicketStatus::Reserved => "reserved",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Transferred => "transferred",
        }
    }
}

/// One sellable unit, embedded in and owned by a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub sellable_item_id: Option<EntityId>,
    pub status: TicketStatus,
    pub quantity: i64,
}

impl Ticket {
    /// Decode one raw embedded ticket, applying the documented defaults:
    /// status "sold" when absent or unrecognized, quantity 1 when absent or
    /// invalid (zero/negative/non-integer).
    pub fn from_raw(raw: &Value) -> Ticket {
        let status = match raw.get("status").and_then(Value::as_str) {
            Some("reserved") => TicketStatus::Reserved,
            Some("cancelled") | Some("canceled") => TicketStatus::Cancelled,
            Some("transferred") => TicketStatus::Transferred,
            _ => TicketStatus::Sold,
        };
        let quantity = raw
            .get("quantity")
            .and_then(Value::as_i64)
            .filter(|q| *q > 0)
            .unwrap_or(1);
        Ticket {
            sellable_item_id: str_field(
                raw,
                &["sellableItemId", "sellable_item_id", "eventTicketId", "event_ticket_id"],
            ),
            status,
            quantity,
        }
    }
}

// ── Registration ───────────────────────────────────────────────────

/// A booking record created independently of payment. The full original
/// document is retained in `doc`; that is where legacy and nested gateway
/// identifier fields live and where the matcher probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub registration_id: EntityId,
    pub confirmation_number: Option<String>,
    pub total_amount_minor: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub payment_status: String,

    pub linked_payment_id: Option<EntityId>,
    pub matched_at: Option<Timestamp>,
    pub matched_by: Option<String>,

    /// Raw embedded tickets; decode with `decoded_tickets`.
    pub tickets: Vec<Value>,
    pub doc: Value,
    pub meta: VersionedMeta,
}

impl Registration {
    pub fn from_raw(registration_id: EntityId, payload: &Value, meta: VersionedMeta) -> Registration {
        let tickets = payload
            .get("tickets")
            .or_else(|| payload.get("registrationData").and_then(|d| d.get("tickets")))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Registration {
            registration_id,
            confirmation_number: str_field(payload, &["confirmationNumber", "confirmation_number"]),
            total_amount_minor: amount_minor(payload),
            currency: str_field(payload, &["currency"]).unwrap_or_else(|| "AUD".to_string()),
            customer_email: str_field(payload, &["customerEmail", "customer_email", "email"]),
            payment_status: str_field(payload, &["paymentStatus", "payment_status"])
                .unwrap_or_else(|| "pending".to_string()),
            linked_payment_id: None,
            matched_at: None,
            matched_by: None,
            tickets,
            doc: payload.clone(),
            meta,
        }
    }

    /// Embedded tickets with boundary defaults applied.
    pub fn decoded_tickets(&self) -> Vec<Ticket> {
        self.tickets.iter().map(Ticket::from_raw).collect()
    }

    /// Registration id carried by a raw payload, if any.
    pub fn raw_id(payload: &Value) -> Option<String> {
        str_field(payload, &["registrationId", "registration_id", "id"])
    }
}

// ── Sellable item ──────────────────────────────────────────────────

/// A capacity-bounded product. The counters are derived from registrations'
/// embedded tickets and fully rebuilt on every recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellableItem {
    pub sellable_item_id: EntityId,
    pub name: String,
    pub total_capacity: i64,
    pub sold_count: i64,
    pub reserved_count: i64,
    pub cancelled_count: i64,
    pub transferred_count: i64,
    pub available_count: i64,
    pub utilization_rate: f64,
    pub last_computed_at: Option<Timestamp>,
}

// ── Staging and queue ──────────────────────────────────────────────

/// A raw, not-yet-committed gateway observation awaiting queue processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedImport {
    pub staging_id: EntityId,
    pub source: Gateway,
    pub raw: Value,
    pub received_at: Timestamp,
    pub check_count: i64,
    pub last_check_at: Option<Timestamp>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Processing,
    Imported,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Processing => "processing",
            ImportStatus::Imported => "imported",
            ImportStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ImportStatus> {
        match s {
            "pending" => Some(ImportStatus::Pending),
            "processing" => Some(ImportStatus::Processing),
            "imported" => Some(ImportStatus::Imported),
            "failed" => Some(ImportStatus::Failed),
            _ => None,
        }
    }
}

/// One proposed (payment, registration, confidence) triple driven through
/// the import state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportQueueItem {
    pub queue_id: EntityId,
    pub staging_id: Option<EntityId>,
    pub source: Gateway,
    pub payment: Value,
    pub registration: Option<Value>,
    pub registration_id: Option<EntityId>,
    pub match_method: Option<String>,
    pub match_confidence: Option<i64>,
    pub status: ImportStatus,
    pub error: Option<String>,
    pub generated_payment_id: Option<EntityId>,
    pub generated_registration_id: Option<EntityId>,
    pub imported_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

// ── Field extraction helpers ───────────────────────────────────────

/// First non-empty string among the given keys.
pub fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = payload.get(*key).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Amount in integer minor units. Prefers explicit minor-unit fields; a
/// float `grossAmount`/`totalAmount` is a legacy major-unit value and is
/// converted.
fn amount_minor(payload: &Value) -> i64 {
    for key in ["amountMinor", "amount_minor", "totalAmountMinor"] {
        if let Some(n) = payload.get(key).and_then(Value::as_i64) {
            return n;
        }
    }
    if let Some(n) = payload
        .get("amountMoney")
        .and_then(|m| m.get("amount"))
        .and_then(Value::as_i64)
    {
        return n;
    }
    if let Some(n) = payload.get("amount").and_then(Value::as_i64) {
        return n;
    }
    for key in ["grossAmount", "totalAmount", "total_amount", "amount"] {
        if let Some(f) = payload.get(key).and_then(Value::as_f64) {
            return (f * 100.0).round() as i64;
        }
    }
    0
}
