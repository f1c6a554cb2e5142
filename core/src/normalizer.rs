//! Timestamp normalizer — the single place raw source time values become
//! canonical epoch-seconds.
//!
//! RULE: No timestamp is ever invented here. Absent or unparseable input
//! yields None; callers that need a fallback supply "now" explicitly at the
//! call site.

use crate::types::{Gateway, Timestamp, MILLIS_THRESHOLD};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// A raw time value as observed in source data: either an integer epoch
/// value (seconds or milliseconds) or a date/time string.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeValue {
    Integer(i64),
    Text(String),
}

impl TimeValue {
    /// Lift a JSON value into a TimeValue. Objects, arrays, bools and nulls
    /// are not time values.
    pub fn from_json(value: &Value) -> Option<TimeValue> {
        match value {
            Value::Number(n) => n.as_i64().map(TimeValue::Integer),
            Value::String(s) if !s.is_empty() => Some(TimeValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// Convert a raw source time value to canonical epoch-seconds.
///
/// - Sources that report epoch-seconds natively (Stripe) pass integers
///   through unchanged.
/// - Integer values at or above the millisecond threshold are floor-divided
///   to seconds; values below it already look like seconds and pass through,
///   which prevents double conversion of already-normalized data.
/// - Text values parse as RFC 3339, with a naive-UTC fallback.
pub fn normalize(raw: Option<&TimeValue>, source: Gateway) -> Option<Timestamp> {
    let raw = raw?;
    match raw {
        TimeValue::Integer(n) => {
            if source.uses_epoch_seconds() {
                return Some(*n);
            }
            Some(to_seconds(*n))
        }
        TimeValue::Text(s) => parse_text(s),
    }
}

/// Floor-divide an epoch value to seconds if it is in the millisecond range.
pub fn to_seconds(n: i64) -> i64 {
    if n >= MILLIS_THRESHOLD {
        n.div_euclid(1000)
    } else {
        n
    }
}

fn parse_text(s: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    // Legacy exports carry naive datetimes; treat them as UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp());
        }
        if fmt == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
                return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
            }
        }
    }
    // Some sources serialize epoch values as strings.
    if let Ok(n) = s.parse::<i64>() {
        return Some(to_seconds(n));
    }
    None
}

/// Render a canonical timestamp for display and reports.
pub fn to_rfc3339(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Fields standardized in place by normalize_record, in document order.
const TIMESTAMP_FIELDS: &[&str] = &[
    "createdAt",
    "created_at",
    "created",
    "updatedAt",
    "updated_at",
    "updated",
    "modifiedAt",
    "modified_at",
    "completedAt",
    "completed_at",
    "refundedAt",
    "refunded_at",
    "cancelledAt",
    "cancelled_at",
    "processedAt",
    "processed_at",
    "payment_date",
    "registration_date",
];

/// Standardize every known timestamp-bearing field of a raw document to
/// epoch-seconds, in place. Fields that are absent or unparseable are left
/// untouched.
pub fn normalize_record(doc: &mut Value, source: Gateway) {
    let Some(map) = doc.as_object_mut() else {
        return;
    };
    for field in TIMESTAMP_FIELDS {
        let Some(value) = map.get(*field) else {
            continue;
        };
        if let Some(ts) = normalize(TimeValue::from_json(value).as_ref(), source) {
            map.insert((*field).to_string(), Value::from(ts));
        }
    }
}
