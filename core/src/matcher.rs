//! Payment matcher — finds the registration a payment paid for.
//!
//! Identifier probing is declarative: the per-gateway probe tables below
//! are the complete, ordered list of registration field paths searched for
//! each candidate payment identifier. The first equality hit wins; there is
//! no scored ranking across simultaneous matches. Fuzzy similarity is
//! surfaced to reviewers as candidates only and is never auto-applied.

use crate::config::ReconConfig;
use crate::entities::Payment;
use crate::error::ReconResult;
use crate::event::ReconEvent;
use crate::store::ReconStore;
use crate::types::{EntityId, Gateway, Timestamp};
use serde::{Deserialize, Serialize};

/// Registration field paths probed for a Square payment identifier, in
/// priority order: canonical top-level, legacy top-level, then the
/// historically-used nested paths. The multiplicity reflects real schema
/// drift across upstream system versions and must be preserved.
pub const SQUARE_PROBE_PATHS: &[&str] = &[
    "squarePaymentId",
    "square_payment_id",
    "registrationData.squarePaymentId",
    "registrationData.square_payment_id",
];

/// Registration field paths probed for a Stripe payment identifier.
pub const STRIPE_PROBE_PATHS: &[&str] = &[
    "stripePaymentIntentId",
    "stripe_payment_intent_id",
    "registrationData.stripePaymentIntentId",
    "registrationData.stripe_payment_intent_id",
];

pub fn probe_paths(source: Gateway) -> &'static [&'static str] {
    match source {
        Gateway::Square => SQUARE_PROBE_PATHS,
        Gateway::Stripe => STRIPE_PROBE_PATHS,
    }
}

/// A winning match: which registration, which field path hit, and how sure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHit {
    pub registration_id: EntityId,
    pub matched_field: String,
    pub method: String,
    pub confidence: i64,
}

/// A reviewer-facing candidate. Fuzzy candidates carry the issues that make
/// them unsafe to auto-apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub registration_id: EntityId,
    pub method: String,
    pub confidence: i64,
    pub issues: Vec<String>,
}

/// Outcome of attempting to apply a match to a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Applied { hit: MatchHit },
    /// Deliberate no-op: the existing match is immutable to automation.
    Protected { reason: String },
    NoMatch,
}

/// Per-item results of a match batch. One bad item never fails the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReport {
    pub processed: usize,
    pub matched: usize,
    pub skipped: usize,
    pub protected: usize,
    pub lines: Vec<MatchReportLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReportLine {
    pub payment_id: EntityId,
    pub outcome: String,
    pub registration_id: Option<EntityId>,
}

pub struct Matcher<'a> {
    store: &'a ReconStore,
    config: &'a ReconConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(store: &'a ReconStore, config: &'a ReconConfig) -> Self {
        Self { store, config }
    }

    /// Search for the registration this payment paid for. Read-only.
    ///
    /// For each candidate payment identifier, the gateway's probe paths are
    /// tried in order; the first equality hit wins at exact confidence. A
    /// registration id carried in the payment's gateway metadata is the
    /// fallback, at metadata confidence. Returns None rather than guessing.
    pub fn find_match(&self, payment: &Payment) -> ReconResult<Option<MatchHit>> {
        for id in payment.candidate_ids() {
            for path in probe_paths(payment.source) {
                if let Some(registration_id) = self.store.find_registration_id_by_path(path, id)? {
                    return Ok(Some(MatchHit {
                        registration_id,
                        matched_field: (*path).to_string(),
                        method: "payment_id".to_string(),
                        confidence: self.config.exact_match_confidence,
                    }));
                }
            }
        }

        if let Some(registration_id) = payment.metadata_registration_id() {
            if self.store.find_registration(&registration_id)?.is_some() {
                return Ok(Some(MatchHit {
                    registration_id,
                    matched_field: "metadata.registrationId".to_string(),
                    method: "metadata".to_string(),
                    confidence: self.config.metadata_match_confidence,
                }));
            }
        }

        Ok(None)
    }

    /// Candidate list for the review UI: the exact hit when one exists,
    /// followed by fuzzy similarity candidates. Fuzzy candidates are never
    /// applied automatically — amount or name proximity is not a
    /// uniqueness guarantee.
    pub fn candidates(&self, payment: &Payment) -> ReconResult<Vec<MatchCandidate>> {
        let mut candidates = Vec::new();

        if let Some(hit) = self.find_match(payment)? {
            candidates.push(MatchCandidate {
                registration_id: hit.registration_id,
                method: hit.method,
                confidence: hit.confidence,
                issues: Vec::new(),
            });
        }

        let window = self.config.fuzzy_time_window_secs;
        let created = payment.meta.source_created_at;
        if let Some(registration) = self.store.find_registration_by_amount_window(
            payment.amount_minor,
            created - window,
            created + window,
        )? {
            if !candidates
                .iter()
                .any(|c| c.registration_id == registration.registration_id)
            {
                candidates.push(MatchCandidate {
                    registration_id: registration.registration_id,
                    method: "amount_time".to_string(),
                    confidence: self.config.amount_time_confidence,
                    issues: vec!["matched by amount and time only - no payment id match".into()],
                });
            }
        }

        if let Some(email) = payment.customer_email.as_deref() {
            if let Some(registration) = self
                .store
                .find_registration_by_email_amount(email, payment.amount_minor)?
            {
                if !candidates
                    .iter()
                    .any(|c| c.registration_id == registration.registration_id)
                {
                    candidates.push(MatchCandidate {
                        registration_id: registration.registration_id,
                        method: "email_amount".to_string(),
                        confidence: self.config.email_amount_confidence,
                        issues: vec!["matched by email and amount only - verify manually".into()],
                    });
                }
            }
        }

        Ok(candidates)
    }

    /// Apply a match to a payment, writing both sides of the link in one
    /// transaction. A manual or invoiced match is read-only: the attempt is
    /// a recorded no-op, not an error.
    pub fn apply_match(
        &self,
        payment_id: &str,
        hit: &MatchHit,
        matched_by: &str,
        now: Timestamp,
    ) -> ReconResult<MatchOutcome> {
        let payment = self.store.get_payment(payment_id)?;

        if let Some(reason) = payment.protection_reason() {
            log::info!("matcher: skipping protected payment {payment_id}: {reason}");
            self.store.append_event(
                "matcher",
                &ReconEvent::MatchProtected {
                    payment_id: payment_id.to_string(),
                    reason: reason.to_string(),
                },
                now,
            )?;
            return Ok(MatchOutcome::Protected {
                reason: reason.to_string(),
            });
        }

        let tx = self.store.begin()?;
        self.store.set_payment_match(
            payment_id,
            &hit.registration_id,
            &hit.method,
            hit.confidence,
            matched_by,
            now,
        )?;
        self.store.set_registration_link(
            &hit.registration_id,
            payment_id,
            payment.source,
            payment.gateway_payment_id(),
            matched_by,
            now,
        )?;
        self.store.append_event(
            "matcher",
            &ReconEvent::PaymentMatched {
                payment_id: payment_id.to_string(),
                registration_id: hit.registration_id.clone(),
                matched_field: hit.matched_field.clone(),
                confidence: hit.confidence,
            },
            now,
        )?;
        tx.commit()?;

        log::debug!(
            "matcher: payment {payment_id} -> registration {} via {}",
            hit.registration_id,
            hit.matched_field
        );
        Ok(MatchOutcome::Applied { hit: hit.clone() })
    }

    /// Reviewer confirmation. Sets matched_by = "manual", after which the
    /// automated matcher treats the link as immutable. An invoiced match
    /// stays immutable even to reviewers.
    pub fn confirm_manual_match(
        &self,
        payment_id: &str,
        registration_id: &str,
        reviewer: &str,
        now: Timestamp,
    ) -> ReconResult<MatchOutcome> {
        let payment = self.store.get_payment(payment_id)?;
        self.store.get_registration(registration_id)?;

        if payment.invoice_id.is_some() {
            let reason = "match is attached to an issued invoice";
            self.store.append_event(
                "matcher",
                &ReconEvent::MatchProtected {
                    payment_id: payment_id.to_string(),
                    reason: reason.to_string(),
                },
                now,
            )?;
            return Ok(MatchOutcome::Protected {
                reason: reason.to_string(),
            });
        }

        let hit = MatchHit {
            registration_id: registration_id.to_string(),
            matched_field: "manual".to_string(),
            method: "manual".to_string(),
            confidence: self.config.exact_match_confidence,
        };

        let tx = self.store.begin()?;
        self.store.set_payment_match(
            payment_id,
            registration_id,
            &hit.method,
            hit.confidence,
            "manual",
            now,
        )?;
        self.store.set_registration_link(
            registration_id,
            payment_id,
            payment.source,
            payment.gateway_payment_id(),
            "manual",
            now,
        )?;
        self.store.append_event(
            "matcher",
            &ReconEvent::ManualMatchConfirmed {
                payment_id: payment_id.to_string(),
                registration_id: registration_id.to_string(),
                reviewer: reviewer.to_string(),
            },
            now,
        )?;
        tx.commit()?;

        Ok(MatchOutcome::Applied { hit })
    }

    /// Walk unmatched, uninvoiced payments oldest-first and apply exact
    /// matches. Reports per-item outcomes; never fails the batch for one
    /// item.
    pub fn match_batch(&self, now: Timestamp) -> ReconResult<MatchReport> {
        let mut report = MatchReport::default();

        for payment in self.store.unmatched_payments(self.config.batch_size)? {
            report.processed += 1;

            if payment.candidate_ids().is_empty() && payment.metadata_registration_id().is_none() {
                report.skipped += 1;
                report.lines.push(MatchReportLine {
                    payment_id: payment.payment_id.clone(),
                    outcome: "skipped: no identifiers to match".to_string(),
                    registration_id: None,
                });
                continue;
            }

            match self.find_match(&payment)? {
                Some(hit) => {
                    match self.apply_match(&payment.payment_id, &hit, "auto-matcher", now)? {
                        MatchOutcome::Applied { hit } => {
                            report.matched += 1;
                            report.lines.push(MatchReportLine {
                                payment_id: payment.payment_id.clone(),
                                outcome: format!("matched via {}", hit.matched_field),
                                registration_id: Some(hit.registration_id),
                            });
                        }
                        MatchOutcome::Protected { reason } => {
                            report.protected += 1;
                            report.lines.push(MatchReportLine {
                                payment_id: payment.payment_id.clone(),
                                outcome: format!("protected: {reason}"),
                                registration_id: payment.matched_registration_id.clone(),
                            });
                        }
                        MatchOutcome::NoMatch => {
                            report.skipped += 1;
                            report.lines.push(MatchReportLine {
                                payment_id: payment.payment_id.clone(),
                                outcome: "skipped: no matching registration".to_string(),
                                registration_id: None,
                            });
                        }
                    }
                }
                None => {
                    report.skipped += 1;
                    report.lines.push(MatchReportLine {
                        payment_id: payment.payment_id.clone(),
                        outcome: "skipped: no matching registration".to_string(),
                        registration_id: None,
                    });
                }
            }
        }

        log::info!(
            "matcher: batch processed={} matched={} skipped={} protected={}",
            report.processed,
            report.matched,
            report.skipped,
            report.protected
        );
        Ok(report)
    }
}
