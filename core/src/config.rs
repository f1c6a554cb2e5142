//! Reconciliation configuration.
//!
//! Loaded from a JSON file, or defaulted. All tunable thresholds live here;
//! component code never hard-codes them.

use crate::error::{ReconError, ReconResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Most-recent version history entries kept per record.
    pub version_history_cap: usize,

    /// Confidence assigned to an exact identifier equality match.
    pub exact_match_confidence: i64,
    /// Confidence assigned to a metadata registration-id match.
    pub metadata_match_confidence: i64,
    /// Confidence assigned to the amount+time fuzzy candidate (review only).
    pub amount_time_confidence: i64,
    /// Confidence assigned to the email+amount fuzzy candidate (review only).
    pub email_amount_confidence: i64,

    /// Allowed amount delta (minor units) for fuzzy candidates.
    pub amount_tolerance_minor: i64,
    /// Half-width of the created-at window for the amount+time candidate.
    pub fuzzy_time_window_secs: i64,

    /// Items drained per process_batch / match_batch call.
    pub batch_size: usize,

    /// Staging sweeps a row may survive before it moves to failed_imports.
    pub staging_max_checks: i64,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            version_history_cap: 50,
            exact_match_confidence: 100,
            metadata_match_confidence: 90,
            amount_time_confidence: 60,
            email_amount_confidence: 50,
            amount_tolerance_minor: 10,
            fuzzy_time_window_secs: 300,
            batch_size: 50,
            staging_max_checks: 5,
        }
    }
}

impl ReconConfig {
    pub fn from_path(path: &Path) -> ReconResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReconError::Config(format!("{}: {e}", path.display())))?;
        let config: ReconConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReconResult<()> {
        if self.version_history_cap == 0 {
            return Err(ReconError::Config(
                "version_history_cap must be at least 1".into(),
            ));
        }
        if !(0..=100).contains(&self.exact_match_confidence) {
            return Err(ReconError::Config(
                "exact_match_confidence must be within 0..=100".into(),
            ));
        }
        Ok(())
    }
}
