//! Tests for the inventory recalculator:
//! 1. Counters are rebuilt in full from embedded tickets — idempotent
//! 2. Every ticket lands in exactly one bucket (reserved/transferred are
//!    subtracted out of sold)
//! 3. Decode-boundary defaults: status "sold", quantity 1
//! 4. Whole-registration deletion recomputes everything back down

use recon_core::config::ReconConfig;
use recon_core::entities::{Registration, Ticket, TicketStatus};
use recon_core::inventory::{affected_sellable_items, compute_counters, Inventory};
use recon_core::store::ReconStore;
use recon_core::types::Gateway;
use recon_core::version_ledger::VersionLedger;
use serde_json::{json, Value};

fn build_store() -> ReconStore {
    let store = ReconStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

fn insert_registration(store: &ReconStore, registration_id: &str, doc: Value) {
    let config = ReconConfig::default();
    let ledger = VersionLedger::new(&config);
    let meta = ledger.initial_meta(&doc, Gateway::Square, 1_000_000);
    let registration = Registration::from_raw(registration_id.to_string(), &doc, meta);
    store.insert_registration(&registration).expect("insert registration");
}

fn ticket(status: &str, quantity: i64) -> Ticket {
    Ticket::from_raw(&json!({ "sellableItemId": "X", "status": status, "quantity": quantity }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Pure counter math
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn sold_and_reserved_against_capacity() {
    // Scenario: sold=2, reserved=1, capacity=10 -> available=7.
    let tickets = vec![ticket("sold", 2), ticket("reserved", 1)];
    let counters = compute_counters(&tickets, 10);

    assert_eq!(counters.sold, 2);
    assert_eq!(counters.reserved, 1);
    assert_eq!(counters.available, 7);
    assert_eq!(counters.utilization_rate, 30.0);
}

#[test]
fn each_ticket_counts_in_exactly_one_bucket() {
    let tickets = vec![
        ticket("sold", 3),
        ticket("reserved", 2),
        ticket("transferred", 1),
        ticket("cancelled", 4),
    ];
    let counters = compute_counters(&tickets, 100);

    // Reserved and transferred are subtracted back out of the raw
    // non-cancelled sum, so no ticket is double counted.
    assert_eq!(counters.sold, 3);
    assert_eq!(counters.reserved, 2);
    assert_eq!(counters.transferred, 1);
    assert_eq!(counters.cancelled, 4);
    assert_eq!(counters.sold + counters.reserved + counters.transferred, 6);
    assert_eq!(counters.available, 95);
}

#[test]
fn defaults_fill_at_the_decode_boundary() {
    let bare = Ticket::from_raw(&json!({ "sellableItemId": "X" }));
    assert_eq!(bare.status, TicketStatus::Sold);
    assert_eq!(bare.quantity, 1);

    let invalid_quantity = Ticket::from_raw(&json!({
        "sellableItemId": "X", "status": "reserved", "quantity": 0
    }));
    assert_eq!(invalid_quantity.quantity, 1);

    let unknown_status = Ticket::from_raw(&json!({
        "sellableItemId": "X", "status": "wat", "quantity": 2
    }));
    assert_eq!(unknown_status.status, TicketStatus::Sold);
}

#[test]
fn available_never_goes_negative_and_zero_capacity_has_zero_rate() {
    let tickets = vec![ticket("sold", 12)];
    let over = compute_counters(&tickets, 10);
    assert_eq!(over.available, 0);

    let unbounded = compute_counters(&tickets, 0);
    assert_eq!(unbounded.utilization_rate, 0.0);
    assert_eq!(unbounded.available, 0);
}

#[test]
fn cancelled_tickets_do_not_consume_capacity() {
    let tickets = vec![ticket("sold", 2), ticket("cancelled", 5)];
    let counters = compute_counters(&tickets, 10);
    assert_eq!(counters.cancelled, 5);
    assert_eq!(counters.available, 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Store-backed recompute
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn recompute_is_idempotent() {
    let store = build_store();
    store.insert_sellable_item("X", "Gala Dinner", 10).unwrap();
    insert_registration(
        &store,
        "r1",
        json!({
            "registrationId": "r1",
            "tickets": [
                { "sellableItemId": "X", "status": "sold", "quantity": 2 },
                { "sellableItemId": "X", "status": "reserved", "quantity": 1 }
            ]
        }),
    );

    let inventory = Inventory::new(&store);
    let first = inventory.recompute("X", 2_000).unwrap();
    let second = inventory.recompute("X", 2_001).unwrap();

    assert_eq!(first, second, "recomputing twice must yield identical counters");
    let item = store.get_sellable_item("X").unwrap();
    assert_eq!(item.sold_count, 2);
    assert_eq!(item.reserved_count, 1);
    assert_eq!(item.available_count, 7);
    assert_eq!(item.last_computed_at, Some(2_001));
}

#[test]
fn recompute_spans_all_registrations_and_legacy_ticket_keys() {
    let store = build_store();
    store.insert_sellable_item("X", "Gala Dinner", 20).unwrap();
    insert_registration(
        &store,
        "r1",
        json!({ "registrationId": "r1",
                "tickets": [{ "sellableItemId": "X", "quantity": 2 }] }),
    );
    // Legacy documents nest tickets and use the old key.
    insert_registration(
        &store,
        "r2",
        json!({ "registrationId": "r2",
                "registrationData": { "tickets": [{ "eventTicketId": "X", "quantity": 3 }] } }),
    );

    let counters = Inventory::new(&store).recompute("X", 2_000).unwrap();
    assert_eq!(counters.sold, 5);
    assert_eq!(counters.available, 15);
}

#[test]
fn recompute_unknown_item_is_not_found() {
    let store = build_store();
    let inventory = Inventory::new(&store);
    assert!(inventory.recompute("nope", 2_000).is_err());
}

#[test]
fn affected_items_deduplicate_in_first_seen_order() {
    let config = ReconConfig::default();
    let ledger = VersionLedger::new(&config);
    let doc = json!({
        "registrationId": "r1",
        "tickets": [
            { "sellableItemId": "B" },
            { "sellableItemId": "A" },
            { "sellableItemId": "B" }
        ]
    });
    let registration = Registration::from_raw(
        "r1".to_string(),
        &doc,
        ledger.initial_meta(&doc, Gateway::Square, 1_000),
    );

    assert_eq!(affected_sellable_items(&registration), vec!["B", "A"]);
}

#[test]
fn deletion_recomputes_counts_back_down() {
    let store = build_store();
    store.insert_sellable_item("X", "Gala Dinner", 10).unwrap();
    insert_registration(
        &store,
        "r1",
        json!({ "registrationId": "r1",
                "tickets": [{ "sellableItemId": "X", "quantity": 4 }] }),
    );

    let inventory = Inventory::new(&store);
    inventory.recompute("X", 2_000).unwrap();
    assert_eq!(store.get_sellable_item("X").unwrap().sold_count, 4);

    // Deleted tickets are no longer enumerable, so deletion triggers a
    // recompute of every sellable item.
    store.delete_registration("r1").unwrap();
    inventory.recompute_all(2_001).unwrap();

    let item = store.get_sellable_item("X").unwrap();
    assert_eq!(item.sold_count, 0);
    assert_eq!(item.available_count, 10);
}
