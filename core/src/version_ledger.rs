//! Version ledger — decides which of two observations of the same logical
//! entity is authoritative, and keeps a bounded, auditable change history.
//!
//! Strategy is newest-wins on the normalized source timestamp. A losing
//! observation is never discarded silently: it is recorded as a conflict
//! entry on the winning record and surfaced through the event log.

use crate::config::ReconConfig;
use crate::normalizer::{self, TimeValue};
use crate::types::{Gateway, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    StatusChange,
    ManualFix,
}

/// One accepted update. `changes` holds old/new pairs for the fields that
/// actually differed — unchanged fields are not recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub version: i64,
    pub timestamp: Timestamp,
    pub changes: Map<String, Value>,
    pub source: String,
    pub change_type: ChangeType,
}

/// A losing observation, attached to the winning record for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub timestamp: Timestamp,
    pub source: String,
    pub conflicting_data: Value,
    pub resolution: String,
    pub resolution_reason: String,
}

/// Version-control fields carried by every payment and registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedMeta {
    pub source_created_at: Timestamp,
    pub source_updated_at: Timestamp,
    pub version_number: i64,
    pub version_history: Vec<VersionHistoryEntry>,
    pub conflicts: Vec<ConflictEntry>,
}

/// Outcome of comparing an incoming observation against stored state.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Incoming wins. `meta` is the version metadata to store with it.
    Accept { meta: VersionedMeta },
    /// Incoming loses. The stored record is left unchanged; the conflict
    /// entry is appended to it.
    Reject { conflict: ConflictEntry },
}

pub struct VersionLedger<'a> {
    config: &'a ReconConfig,
}

impl<'a> VersionLedger<'a> {
    pub fn new(config: &'a ReconConfig) -> Self {
        Self { config }
    }

    /// Decide whether `incoming` supersedes the stored record.
    ///
    /// - No existing record: incoming wins unconditionally at version 1.
    /// - Otherwise the strictly newer source timestamp wins; ties and older
    ///   observations lose and are recorded as conflicts.
    pub fn decide(
        &self,
        existing: Option<(&VersionedMeta, &Value)>,
        incoming: &Value,
        source: Gateway,
        now: Timestamp,
    ) -> Decision {
        let incoming_ts = extract_source_timestamp(incoming, source);

        let Some((meta, stored)) = existing else {
            return Decision::Accept {
                meta: self.initial_meta(incoming, source, now),
            };
        };

        let wins = match incoming_ts {
            Some(ts) => ts > meta.source_updated_at,
            None => false,
        };

        if !wins {
            return Decision::Reject {
                conflict: ConflictEntry {
                    timestamp: now,
                    source: source.as_str().to_string(),
                    conflicting_data: incoming.clone(),
                    resolution: "auto".to_string(),
                    resolution_reason: "existing record is newer".to_string(),
                },
            };
        }

        let entry = VersionHistoryEntry {
            version: meta.version_number + 1,
            timestamp: now,
            changes: diff(stored, incoming),
            source: source.as_str().to_string(),
            change_type: detect_change_type(stored, incoming),
        };

        let mut history = meta.version_history.clone();
        history.push(entry);
        let cap = self.config.version_history_cap;
        if history.len() > cap {
            history.drain(..history.len() - cap);
        }

        Decision::Accept {
            meta: VersionedMeta {
                source_created_at: meta.source_created_at,
                // wins implies incoming_ts is Some
                source_updated_at: incoming_ts.unwrap_or(now),
                version_number: meta.version_number + 1,
                version_history: history,
                conflicts: meta.conflicts.clone(),
            },
        }
    }

    /// Version metadata for a first observation: version 1 with a single
    /// create entry. Source timestamps fall back to `now` when the record
    /// carries none.
    pub fn initial_meta(&self, incoming: &Value, source: Gateway, now: Timestamp) -> VersionedMeta {
        let ts = extract_source_timestamp(incoming, source).unwrap_or(now);
        VersionedMeta {
            source_created_at: ts,
            source_updated_at: ts,
            version_number: 1,
            version_history: vec![VersionHistoryEntry {
                version: 1,
                timestamp: now,
                changes: created_changes(),
                source: source.as_str().to_string(),
                change_type: ChangeType::Create,
            }],
            conflicts: Vec::new(),
        }
    }
}

/// Extract the source-update timestamp of a raw record, normalized to
/// epoch-seconds, following each gateway's native field conventions.
pub fn extract_source_timestamp(record: &Value, source: Gateway) -> Option<Timestamp> {
    let fields: &[&str] = match source {
        Gateway::Square => &["updatedAt", "updated_at", "createdAt", "created_at"],
        Gateway::Stripe => &["updated", "created"],
    };
    for field in fields {
        if let Some(value) = record.get(*field) {
            if let Some(ts) = normalizer::normalize(TimeValue::from_json(value).as_ref(), source) {
                return Some(ts);
            }
        }
    }
    None
}

fn created_changes() -> Map<String, Value> {
    let mut changes = Map::new();
    changes.insert("_created".to_string(), Value::Bool(true));
    changes
}

/// Field-by-field diff over the incoming record's keys. Internal version
/// bookkeeping fields are not diffed.
fn diff(old: &Value, new: &Value) -> Map<String, Value> {
    let mut changes = Map::new();
    let Some(new_map) = new.as_object() else {
        return changes;
    };
    for (key, new_value) in new_map {
        if key.starts_with('_') {
            continue;
        }
        let old_value = old.get(key).unwrap_or(&Value::Null);
        if old_value != new_value {
            changes.insert(
                key.clone(),
                json!({ "old": old_value, "new": new_value }),
            );
        }
    }
    changes
}

const STATUS_FIELDS: &[&str] = &["status", "paymentStatus", "payment_status"];

fn detect_change_type(old: &Value, new: &Value) -> ChangeType {
    for field in STATUS_FIELDS {
        if old.get(*field) != new.get(*field) {
            return ChangeType::StatusChange;
        }
    }
    if is_manual(old) || is_manual(new) {
        return ChangeType::ManualFix;
    }
    ChangeType::Update
}

fn is_manual(record: &Value) -> bool {
    ["matchedBy", "modifiedBy"]
        .iter()
        .any(|f| record.get(*f).and_then(Value::as_str) == Some("manual"))
}
