//! Shared primitive types used across the reconciliation core.

use serde::{Deserialize, Serialize};

/// Canonical timestamp: seconds since the Unix epoch.
pub type Timestamp = i64;

/// A stable, unique identifier for any entity in the system.
pub type EntityId = String;

/// Integer value threshold separating epoch-milliseconds from epoch-seconds.
/// Values at or above this are treated as milliseconds (13+ digit range).
pub const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// An external payment-processing system producing payment observations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Square,
    Stripe,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::Square => "square",
            Gateway::Stripe => "stripe",
        }
    }

    pub fn parse(s: &str) -> Option<Gateway> {
        match s {
            "square" => Some(Gateway::Square),
            "stripe" => Some(Gateway::Stripe),
            _ => None,
        }
    }

    /// Stripe reports epoch-seconds natively; Square reports RFC 3339 text.
    pub fn uses_epoch_seconds(&self) -> bool {
        matches!(self, Gateway::Stripe)
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
