//! Tests for the version ledger's conflict resolution:
//! 1. First observation wins unconditionally at version 1
//! 2. Strictly newer observations win; ties and older lose
//! 3. Losing observations become conflict entries, never silent drops
//! 4. Change types are classified and diffs cover only changed fields
//! 5. History is capped at the configured bound
//! 6. Newest-wins is order-independent across delivery interleavings

use recon_core::config::ReconConfig;
use recon_core::types::Gateway;
use recon_core::version_ledger::{ChangeType, Decision, VersionLedger, VersionedMeta};
use serde_json::{json, Value};

fn ledger_config() -> ReconConfig {
    ReconConfig::default()
}

/// Apply a decision the way the store does: accepted payloads replace the
/// stored one, rejected payloads only add a conflict.
fn apply(
    ledger: &VersionLedger,
    state: &mut Option<(VersionedMeta, Value)>,
    incoming: &Value,
    now: i64,
) {
    let existing = state.as_ref().map(|(m, v)| (m, v));
    match ledger.decide(existing, incoming, Gateway::Stripe, now) {
        Decision::Accept { meta } => *state = Some((meta, incoming.clone())),
        Decision::Reject { conflict } => {
            if let Some((meta, _)) = state.as_mut() {
                meta.conflicts.push(conflict);
            }
        }
    }
}

#[test]
fn first_observation_creates_version_one() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);

    let incoming = json!({ "id": "p1", "status": "pending", "updated": 100 });
    let Decision::Accept { meta } = ledger.decide(None, &incoming, Gateway::Stripe, 1000) else {
        panic!("first observation must be accepted");
    };

    assert_eq!(meta.version_number, 1);
    assert_eq!(meta.source_updated_at, 100);
    assert_eq!(meta.source_created_at, 100);
    assert_eq!(meta.version_history.len(), 1);
    assert_eq!(meta.version_history[0].change_type, ChangeType::Create);
}

#[test]
fn newer_observation_wins_and_appends_history() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let mut state = None;

    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "pending", "updated": 100 }), 1000);
    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "paid", "updated": 200 }), 1001);

    let (meta, payload) = state.expect("state present");
    assert_eq!(meta.version_number, 2);
    assert_eq!(meta.source_updated_at, 200);
    assert_eq!(payload["status"], json!("paid"));
    assert_eq!(meta.version_history.len(), 2);

    let entry = &meta.version_history[1];
    assert_eq!(entry.change_type, ChangeType::StatusChange);
    // Diff covers only the fields that actually differ.
    assert!(entry.changes.contains_key("status"));
    assert!(entry.changes.contains_key("updated"));
    assert!(!entry.changes.contains_key("id"));
    assert_eq!(entry.changes["status"]["old"], json!("pending"));
    assert_eq!(entry.changes["status"]["new"], json!("paid"));
}

#[test]
fn older_redelivery_is_rejected_with_conflict() {
    // Scenario: p1 imported at t=100, then redelivered with t=50.
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let mut state = None;

    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "pending", "updated": 100 }), 1000);
    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "failed", "updated": 50 }), 1001);

    let (meta, payload) = state.expect("state present");
    assert_eq!(payload["status"], json!("pending"), "stored record must be unchanged");
    assert_eq!(meta.version_number, 1, "version must not advance on a loss");
    assert_eq!(meta.conflicts.len(), 1);
    assert_eq!(meta.conflicts[0].resolution, "auto");
    assert_eq!(meta.conflicts[0].conflicting_data["status"], json!("failed"));
}

#[test]
fn equal_timestamps_lose() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let mut state = None;

    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "pending", "updated": 100 }), 1000);
    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "paid", "updated": 100 }), 1001);

    let (meta, payload) = state.expect("state present");
    assert_eq!(payload["status"], json!("pending"));
    assert_eq!(meta.version_number, 1);
    assert_eq!(meta.conflicts.len(), 1);
}

#[test]
fn missing_incoming_timestamp_loses() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let mut state = None;

    apply(&ledger, &mut state, &json!({ "id": "p1", "updated": 100 }), 1000);
    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "paid" }), 1001);

    let (meta, _) = state.expect("state present");
    assert_eq!(meta.version_number, 1);
    assert_eq!(meta.conflicts.len(), 1);
}

#[test]
fn manual_flag_classifies_as_manual_fix() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let mut state = None;

    apply(&ledger, &mut state, &json!({ "id": "p1", "status": "paid", "updated": 100 }), 1000);
    apply(
        &ledger,
        &mut state,
        &json!({ "id": "p1", "status": "paid", "matchedBy": "manual", "updated": 200 }),
        1001,
    );

    let (meta, _) = state.expect("state present");
    assert_eq!(meta.version_history[1].change_type, ChangeType::ManualFix);
}

#[test]
fn history_is_capped_at_fifty_entries() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let mut state = None;

    for i in 0..60i64 {
        apply(
            &ledger,
            &mut state,
            &json!({ "id": "p1", "counter": i, "updated": 100 + i }),
            2000 + i,
        );
    }

    let (meta, _) = state.expect("state present");
    assert_eq!(meta.version_number, 60);
    assert_eq!(meta.version_history.len(), 50, "oldest entries must be dropped");
    // The newest entry survives; the create entry does not.
    assert_eq!(meta.version_history.last().map(|e| e.version), Some(60));
    assert_eq!(meta.version_history.first().map(|e| e.version), Some(11));
}

#[test]
fn newest_wins_regardless_of_delivery_order() {
    let config = ledger_config();
    let ledger = VersionLedger::new(&config);
    let a = json!({ "id": "p1", "status": "pending", "updated": 100 });
    let b = json!({ "id": "p1", "status": "paid", "updated": 200 });

    let mut forward = None;
    apply(&ledger, &mut forward, &a, 1000);
    apply(&ledger, &mut forward, &b, 1001);

    let mut reversed = None;
    apply(&ledger, &mut reversed, &b, 1000);
    apply(&ledger, &mut reversed, &a, 1001);

    let (fw_meta, fw_payload) = forward.expect("state present");
    let (rv_meta, rv_payload) = reversed.expect("state present");
    assert_eq!(fw_payload, rv_payload, "stored payload must equal applying B last");
    assert_eq!(fw_payload["status"], json!("paid"));
    assert_eq!(fw_meta.source_updated_at, rv_meta.source_updated_at);
}
