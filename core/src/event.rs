//! Audit events — every state change the core makes is recorded here.
//!
//! RULE: Components emit events through the store's event log; they never
//! signal each other in memory. The log is the batch-run status surface
//! consumed by external tooling.

use crate::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// Every event emitted during reconciliation.
/// Variants are added over time — never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconEvent {
    // ── Matcher ────────────────────────────────────
    PaymentMatched {
        payment_id: EntityId,
        registration_id: EntityId,
        matched_field: String,
        confidence: i64,
    },
    MatchProtected {
        payment_id: EntityId,
        reason: String,
    },
    ManualMatchConfirmed {
        payment_id: EntityId,
        registration_id: EntityId,
        reviewer: String,
    },

    // ── Version ledger ─────────────────────────────
    ConflictRecorded {
        entity: String,
        entity_id: EntityId,
        source: String,
        reason: String,
    },

    // ── Import queue ───────────────────────────────
    QueueItemImported {
        queue_id: EntityId,
        payment_id: EntityId,
        registration_id: EntityId,
    },
    QueueItemFailed {
        queue_id: EntityId,
        error: String,
    },
    StagingExpired {
        staging_id: EntityId,
        reason: String,
    },

    // ── Inventory ──────────────────────────────────
    InventoryRecomputed {
        sellable_item_id: EntityId,
        sold: i64,
        reserved: i64,
        cancelled: i64,
        available: i64,
    },

    // ── Repair sweep ───────────────────────────────
    LinkRepaired {
        payment_id: EntityId,
        registration_id: EntityId,
        side: String,
    },
}

/// A persisted event log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub occurred_at: Timestamp,
    pub component: String,
    pub event_type: String,
    pub payload: String,
}

/// Stable name for an event, used as the event_log.event_type column.
pub fn event_type_name(event: &ReconEvent) -> &'static str {
    match event {
        ReconEvent::PaymentMatched { .. } => "payment_matched",
        ReconEvent::MatchProtected { .. } => "match_protected",
        ReconEvent::ManualMatchConfirmed { .. } => "manual_match_confirmed",
        ReconEvent::ConflictRecorded { .. } => "conflict_recorded",
        ReconEvent::QueueItemImported { .. } => "queue_item_imported",
        ReconEvent::QueueItemFailed { .. } => "queue_item_failed",
        ReconEvent::StagingExpired { .. } => "staging_expired",
        ReconEvent::InventoryRecomputed { .. } => "inventory_recomputed",
        ReconEvent::LinkRepaired { .. } => "link_repaired",
    }
}
