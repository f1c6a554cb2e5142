//! Tests for the repair sweep — the compensating path for one-sided
//! payment/registration links:
//! 1. A payment-only link gets its registration back-link restored
//! 2. A registration-only link gets its payment forward link restored
//! 3. Unhealable inconsistencies are flagged, never swallowed
//! 4. A protected payment's recorded link is never overwritten

use recon_core::config::ReconConfig;
use recon_core::entities::{Payment, Registration};
use recon_core::repair::Repair;
use recon_core::store::ReconStore;
use recon_core::types::Gateway;
use recon_core::version_ledger::VersionLedger;
use serde_json::{json, Value};

fn build_store() -> ReconStore {
    let store = ReconStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

fn insert_payment(store: &ReconStore, payment_id: &str, raw: Value) -> Payment {
    let config = ReconConfig::default();
    let ledger = VersionLedger::new(&config);
    let meta = ledger.initial_meta(&raw, Gateway::Square, 1_000_000);
    let payment = Payment::from_raw(payment_id.to_string(), &raw, Gateway::Square, meta);
    store.insert_payment(&payment).expect("insert payment");
    payment
}

fn insert_registration(store: &ReconStore, registration_id: &str, doc: Value) {
    let config = ReconConfig::default();
    let ledger = VersionLedger::new(&config);
    let meta = ledger.initial_meta(&doc, Gateway::Square, 1_000_000);
    let registration = Registration::from_raw(registration_id.to_string(), &doc, meta);
    store.insert_registration(&registration).expect("insert registration");
}

#[test]
fn one_sided_forward_link_is_healed() {
    let store = build_store();
    let config = ReconConfig::default();
    insert_registration(&store, "r1", json!({ "registrationId": "r1" }));
    insert_payment(&store, "p1", json!({ "paymentId": "sq_1" }));

    // Simulate a crash between the two writes: only the payment side
    // committed.
    store
        .set_payment_match("p1", "r1", "payment_id", 100, "auto-matcher", 1_000_100)
        .unwrap();
    assert!(store.get_registration("r1").unwrap().linked_payment_id.is_none());

    let report = Repair::new(&store, &config).repair_sweep(1_000_200).unwrap();

    assert_eq!(report.repaired, 1);
    assert!(report.inconsistent.is_empty());
    let registration = store.get_registration("r1").unwrap();
    assert_eq!(registration.linked_payment_id.as_deref(), Some("p1"));
    assert_eq!(registration.doc["squarePaymentId"], json!("sq_1"));
    assert_eq!(store.event_count("link_repaired").unwrap(), 1);
}

#[test]
fn one_sided_back_link_is_healed() {
    let store = build_store();
    let config = ReconConfig::default();
    insert_registration(&store, "r1", json!({ "registrationId": "r1" }));
    let payment = insert_payment(&store, "p1", json!({ "paymentId": "sq_1" }));

    store
        .set_registration_link(
            "r1",
            "p1",
            payment.source,
            payment.gateway_payment_id(),
            "import-queue",
            1_000_100,
        )
        .unwrap();
    assert!(store.get_payment("p1").unwrap().matched_registration_id.is_none());

    let report = Repair::new(&store, &config).repair_sweep(1_000_200).unwrap();

    assert_eq!(report.repaired, 1);
    let healed = store.get_payment("p1").unwrap();
    assert_eq!(healed.matched_registration_id.as_deref(), Some("r1"));
    assert_eq!(healed.matched_by.as_deref(), Some("repair-sweep"));
}

#[test]
fn sweep_converges_nothing_left_on_second_pass() {
    let store = build_store();
    let config = ReconConfig::default();
    insert_registration(&store, "r1", json!({ "registrationId": "r1" }));
    insert_payment(&store, "p1", json!({ "paymentId": "sq_1" }));
    store
        .set_payment_match("p1", "r1", "payment_id", 100, "auto-matcher", 1_000_100)
        .unwrap();

    let repair = Repair::new(&store, &config);
    let first = repair.repair_sweep(1_000_200).unwrap();
    assert_eq!(first.repaired, 1);

    let second = repair.repair_sweep(1_000_300).unwrap();
    assert_eq!(second.repaired, 0, "a healed store needs no further repairs");
    assert!(second.inconsistent.is_empty());
}

#[test]
fn link_to_missing_registration_is_flagged_not_swallowed() {
    let store = build_store();
    let config = ReconConfig::default();
    insert_payment(&store, "p1", json!({ "paymentId": "sq_1" }));
    store
        .set_payment_match("p1", "r-gone", "payment_id", 100, "auto-matcher", 1_000_100)
        .unwrap();

    let report = Repair::new(&store, &config).repair_sweep(1_000_200).unwrap();

    assert_eq!(report.repaired, 0);
    assert_eq!(report.inconsistent.len(), 1);
    assert!(report.inconsistent[0].contains("r-gone"));
}

#[test]
fn stale_back_link_against_protected_payment_is_flagged() {
    let store = build_store();
    let config = ReconConfig::default();
    insert_registration(&store, "r-manual", json!({ "registrationId": "r-manual" }));
    insert_registration(&store, "r-stale", json!({ "registrationId": "r-stale" }));
    let payment = insert_payment(&store, "p1", json!({ "paymentId": "sq_1" }));

    // The payment is manually matched to r-manual; r-stale still carries
    // an old back-link.
    store
        .set_payment_match("p1", "r-manual", "manual", 100, "manual", 1_000_100)
        .unwrap();
    store
        .set_registration_link(
            "r-manual",
            "p1",
            payment.source,
            payment.gateway_payment_id(),
            "manual",
            1_000_100,
        )
        .unwrap();
    store
        .set_registration_link(
            "r-stale",
            "p1",
            payment.source,
            payment.gateway_payment_id(),
            "import-queue",
            1_000_050,
        )
        .unwrap();

    let report = Repair::new(&store, &config).repair_sweep(1_000_200).unwrap();

    assert_eq!(report.inconsistent.len(), 1);
    let stored = store.get_payment("p1").unwrap();
    assert_eq!(
        stored.matched_registration_id.as_deref(),
        Some("r-manual"),
        "the manual link must survive the sweep"
    );
}
