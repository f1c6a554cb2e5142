//! Import queue — the state machine that turns an accepted (payment,
//! registration, confidence) triple into committed, idempotent store
//! side effects.
//!
//! States: pending -> processing -> imported | failed. No other
//! transitions exist. Entry to processing is an atomic claim and the only
//! point at which side effects begin; both sides of the payment /
//! registration link are written in one transaction, so a failed item
//! leaves no partial mutation behind.

use crate::config::ReconConfig;
use crate::entities::{
    str_field, ImportQueueItem, ImportStatus, Payment, Registration, StagedImport,
};
use crate::error::{ReconError, ReconResult};
use crate::event::ReconEvent;
use crate::inventory::Inventory;
use crate::matcher::Matcher;
use crate::store::ReconStore;
use crate::types::{EntityId, Gateway, Timestamp};
use crate::version_ledger::{extract_source_timestamp, Decision, VersionLedger, VersionedMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Outcome of processing a single queue item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Imported {
        payment_id: EntityId,
        registration_id: EntityId,
    },
    Failed {
        error: String,
    },
    /// The item was not in 'pending' — claimed by a competing worker or
    /// already terminal as 'failed'.
    NotClaimed {
        status: ImportStatus,
    },
}

/// Per-item results of building queue items from staged imports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    pub enqueued: usize,
    pub still_pending: usize,
    pub expired: usize,
}

/// Per-item results of a processing batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: usize,
    pub imported: usize,
    pub failed: usize,
    pub not_claimed: usize,
    pub cancelled: bool,
    pub lines: Vec<BatchLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLine {
    pub queue_id: EntityId,
    pub outcome: String,
}

pub struct ImportQueue<'a> {
    store: &'a ReconStore,
    config: &'a ReconConfig,
}

impl<'a> ImportQueue<'a> {
    pub fn new(store: &'a ReconStore, config: &'a ReconConfig) -> Self {
        Self { store, config }
    }

    // ── Staging ────────────────────────────────────────────────

    /// Stage one raw, gateway-tagged observation. Timestamp fields are
    /// standardized to epoch-seconds on the way in; nothing else is
    /// interpreted yet.
    pub fn stage(&self, source: Gateway, raw: Value, now: Timestamp) -> ReconResult<EntityId> {
        let mut raw = raw;
        crate::normalizer::normalize_record(&mut raw, source);
        let staged = StagedImport {
            staging_id: Uuid::new_v4().to_string(),
            source,
            raw,
            received_at: now,
            check_count: 0,
            last_check_at: None,
            reason: None,
        };
        self.store.insert_staged(&staged)?;
        Ok(staged.staging_id)
    }

    /// Turn staged observations into pending queue items.
    ///
    /// Each staged import is matched against the registration store; a hit
    /// (or an embedded registration document) produces a queue item. An
    /// observation with nothing to link against stays staged with its
    /// check count incremented, and moves to failed_imports once the cap
    /// is exceeded. No internal retries — each sweep touches an item once.
    pub fn build_queue(&self, matcher: &Matcher, now: Timestamp) -> ReconResult<BuildReport> {
        let mut report = BuildReport::default();

        let staged_batch = self
            .store
            .staged_under_cap(self.config.staging_max_checks, self.config.batch_size)?;

        for staged in staged_batch {
            if self.store.queue_item_exists_for_staging(&staged.staging_id)? {
                continue;
            }

            let probe = self.probe_payment(&staged);
            let hit = matcher.find_match(&probe)?;
            let registration_payload = staged.raw.get("registration").cloned();

            let (registration_id, match_method, match_confidence) = match &hit {
                Some(hit) => (
                    Some(hit.registration_id.clone()),
                    Some(hit.method.clone()),
                    Some(hit.confidence),
                ),
                None => match &registration_payload {
                    Some(payload) => (Registration::raw_id(payload), None, None),
                    None => {
                        let reason = "no matching registration yet";
                        self.store.touch_staged(&staged.staging_id, now, reason)?;
                        if staged.check_count + 1 >= self.config.staging_max_checks {
                            let mut expired = staged.clone();
                            expired.check_count += 1;
                            self.store.move_staged_to_failed(&expired, reason, now)?;
                            self.store.append_event(
                                "import_queue",
                                &ReconEvent::StagingExpired {
                                    staging_id: staged.staging_id.clone(),
                                    reason: reason.to_string(),
                                },
                                now,
                            )?;
                            report.expired += 1;
                        } else {
                            report.still_pending += 1;
                        }
                        continue;
                    }
                },
            };

            let item = ImportQueueItem {
                queue_id: Uuid::new_v4().to_string(),
                staging_id: Some(staged.staging_id.clone()),
                source: staged.source,
                payment: staged.raw.clone(),
                registration: registration_payload,
                registration_id,
                match_method,
                match_confidence,
                status: ImportStatus::Pending,
                error: None,
                generated_payment_id: None,
                generated_registration_id: None,
                imported_at: None,
                created_at: now,
            };
            self.store.insert_queue_item(&item)?;
            report.enqueued += 1;
        }

        log::info!(
            "import_queue: build enqueued={} still_pending={} expired={}",
            report.enqueued,
            report.still_pending,
            report.expired
        );
        Ok(report)
    }

    // ── Processing ─────────────────────────────────────────────

    /// Process one queue item. Idempotent entry point: an item already in
    /// 'imported' is an AlreadyTerminal error and nothing is mutated.
    pub fn process_item(&self, queue_id: &str, now: Timestamp) -> ReconResult<ProcessOutcome> {
        self.process_item_cancellable(queue_id, &AtomicBool::new(false), now)
    }

    /// Drain pending items oldest-first. The cancel flag is observed
    /// between items and at the defined checkpoint inside an item; a
    /// cancelled batch never leaves an item stuck in 'processing'.
    pub fn process_batch(
        &self,
        cancel: &AtomicBool,
        now: Timestamp,
    ) -> ReconResult<BatchReport> {
        let mut report = BatchReport::default();

        for item in self.store.pending_queue_items(self.config.batch_size)? {
            if cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }
            report.processed += 1;
            let outcome = self.process_item_cancellable(&item.queue_id, cancel, now)?;
            let line = match &outcome {
                ProcessOutcome::Imported {
                    payment_id,
                    registration_id,
                } => {
                    report.imported += 1;
                    format!("imported: payment {payment_id} <-> registration {registration_id}")
                }
                ProcessOutcome::Failed { error } => {
                    report.failed += 1;
                    format!("failed: {error}")
                }
                ProcessOutcome::NotClaimed { status } => {
                    report.not_claimed += 1;
                    format!("not claimed: status {}", status.as_str())
                }
            };
            report.lines.push(BatchLine {
                queue_id: item.queue_id.clone(),
                outcome: line,
            });
        }

        log::info!(
            "import_queue: batch processed={} imported={} failed={} cancelled={}",
            report.processed,
            report.imported,
            report.failed,
            report.cancelled
        );
        Ok(report)
    }

    /// Process one queue item under a cancellation token. A cancellation
    /// observed after the claim still drives the item to a terminal state
    /// instead of abandoning it in 'processing'.
    pub fn process_item_cancellable(
        &self,
        queue_id: &str,
        cancel: &AtomicBool,
        now: Timestamp,
    ) -> ReconResult<ProcessOutcome> {
        let item = self.store.get_queue_item(queue_id)?;

        if item.status == ImportStatus::Imported {
            return Err(ReconError::AlreadyTerminal {
                queue_id: queue_id.to_string(),
            });
        }

        if !self.store.claim_queue_item(queue_id)? {
            let status = self.store.get_queue_item(queue_id)?.status;
            return Ok(ProcessOutcome::NotClaimed { status });
        }

        if cancel.load(Ordering::Relaxed) {
            let error = "cancelled before apply".to_string();
            self.fail_item(queue_id, &error, now)?;
            return Ok(ProcessOutcome::Failed { error });
        }

        match self.apply(&item, now) {
            Ok((payment_id, registration_id)) => {
                // Fan-out recompute runs after the commit.
                let registration = self.store.get_registration(&registration_id)?;
                Inventory::new(self.store).recompute_affected(&registration, now)?;

                Ok(ProcessOutcome::Imported {
                    payment_id,
                    registration_id,
                })
            }
            Err(e) => {
                let error = e.to_string();
                self.fail_item(queue_id, &error, now)?;
                Ok(ProcessOutcome::Failed { error })
            }
        }
    }

    fn fail_item(&self, queue_id: &str, error: &str, now: Timestamp) -> ReconResult<()> {
        log::warn!("import_queue: item {queue_id} failed: {error}");
        self.store.mark_queue_failed(queue_id, error)?;
        self.store.append_event(
            "import_queue",
            &ReconEvent::QueueItemFailed {
                queue_id: queue_id.to_string(),
                error: error.to_string(),
            },
            now,
        )?;
        Ok(())
    }

    /// The transactional body: upsert payment, upsert registration, write
    /// the mutual link, finalize the queue item, delete the staging copy.
    /// Any error rolls the whole unit back.
    fn apply(&self, item: &ImportQueueItem, now: Timestamp) -> ReconResult<(EntityId, EntityId)> {
        let ledger = VersionLedger::new(self.config);
        let tx = self.store.begin()?;

        let payment_id = self.upsert_payment(&ledger, item, now)?;
        let registration_id = self.upsert_registration(&ledger, item, now)?;
        self.link_both_sides(item, &payment_id, &registration_id, now)?;

        self.store
            .mark_queue_imported(&item.queue_id, &payment_id, &registration_id, now)?;
        if let Some(staging_id) = &item.staging_id {
            self.store.delete_staged(staging_id)?;
        }
        self.store.append_event(
            "import_queue",
            &ReconEvent::QueueItemImported {
                queue_id: item.queue_id.clone(),
                payment_id: payment_id.clone(),
                registration_id: registration_id.clone(),
            },
            now,
        )?;

        tx.commit()?;
        Ok((payment_id, registration_id))
    }

    fn upsert_payment(
        &self,
        ledger: &VersionLedger,
        item: &ImportQueueItem,
        now: Timestamp,
    ) -> ReconResult<EntityId> {
        let gateway_id = str_field(&item.payment, &["paymentId", "payment_id", "id"]);

        let existing = match gateway_id.as_deref() {
            Some(id) => self.store.find_payment_by_gateway_id(item.source, id)?,
            None => None,
        };

        match existing {
            Some(stored) => {
                match ledger.decide(
                    Some((&stored.meta, &stored.raw)),
                    &item.payment,
                    item.source,
                    now,
                ) {
                    Decision::Accept { meta } => {
                        let updated = Payment::from_raw(
                            stored.payment_id.clone(),
                            &item.payment,
                            item.source,
                            meta,
                        );
                        self.store.update_payment_observation(&updated)?;
                    }
                    Decision::Reject { conflict } => {
                        self.store
                            .append_payment_conflict(&stored.payment_id, &conflict)?;
                        self.store.append_event(
                            "version_ledger",
                            &ReconEvent::ConflictRecorded {
                                entity: "payment".to_string(),
                                entity_id: stored.payment_id.clone(),
                                source: conflict.source.clone(),
                                reason: conflict.resolution_reason.clone(),
                            },
                            now,
                        )?;
                    }
                }
                Ok(stored.payment_id)
            }
            None => {
                let meta = ledger.initial_meta(&item.payment, item.source, now);
                let payment = Payment::from_raw(
                    Uuid::new_v4().to_string(),
                    &item.payment,
                    item.source,
                    meta,
                );
                let payment_id = payment.payment_id.clone();
                self.store.insert_payment(&payment)?;
                Ok(payment_id)
            }
        }
    }

    fn upsert_registration(
        &self,
        ledger: &VersionLedger,
        item: &ImportQueueItem,
        now: Timestamp,
    ) -> ReconResult<EntityId> {
        let registration_id = item
            .registration_id
            .clone()
            .or_else(|| item.registration.as_ref().and_then(Registration::raw_id))
            .ok_or_else(|| ReconError::NotFound {
                entity: "registration",
                id: "<none referenced by queue item>".to_string(),
            })?;

        match self.store.find_registration(&registration_id)? {
            Some(stored) => {
                // Update in place, merging what the payment import owns;
                // a stale embedded document becomes a conflict instead.
                if let Some(payload) = &item.registration {
                    match ledger.decide(Some((&stored.meta, &stored.doc)), payload, item.source, now)
                    {
                        Decision::Accept { meta } => {
                            let updated =
                                Registration::from_raw(registration_id.clone(), payload, meta);
                            self.store.update_registration_observation(&updated)?;
                        }
                        Decision::Reject { conflict } => {
                            self.store
                                .append_registration_conflict(&registration_id, &conflict)?;
                            self.store.append_event(
                                "version_ledger",
                                &ReconEvent::ConflictRecorded {
                                    entity: "registration".to_string(),
                                    entity_id: registration_id.clone(),
                                    source: conflict.source.clone(),
                                    reason: conflict.resolution_reason.clone(),
                                },
                                now,
                            )?;
                        }
                    }
                }
                Ok(registration_id)
            }
            None => {
                let payload = item
                    .registration
                    .clone()
                    .ok_or_else(|| ReconError::NotFound {
                        entity: "registration",
                        id: registration_id.clone(),
                    })?;
                let meta = ledger.initial_meta(&payload, item.source, now);
                self.store.insert_registration(&Registration::from_raw(
                    registration_id.clone(),
                    &payload,
                    meta,
                ))?;
                Ok(registration_id)
            }
        }
    }

    /// Write the mutual payment <-> registration link. A protected payment
    /// match (manual or invoiced) is left exactly as it is.
    fn link_both_sides(
        &self,
        item: &ImportQueueItem,
        payment_id: &str,
        registration_id: &str,
        now: Timestamp,
    ) -> ReconResult<()> {
        let payment = self.store.get_payment(payment_id)?;

        if let Some(reason) = payment.protection_reason() {
            if payment.matched_registration_id.as_deref() != Some(registration_id) {
                self.store.append_event(
                    "import_queue",
                    &ReconEvent::MatchProtected {
                        payment_id: payment_id.to_string(),
                        reason: reason.to_string(),
                    },
                    now,
                )?;
                return Ok(());
            }
        }

        let method = item.match_method.as_deref().unwrap_or("import-queue");
        let confidence = item
            .match_confidence
            .unwrap_or(self.config.exact_match_confidence);
        self.store.set_payment_match(
            payment_id,
            registration_id,
            method,
            confidence,
            "import-queue",
            now,
        )?;
        self.store.set_registration_link(
            registration_id,
            payment_id,
            payment.source,
            payment.gateway_payment_id(),
            "import-queue",
            now,
        )?;
        Ok(())
    }

    /// Build a probe payment for matching a staged observation that has
    /// not been imported yet.
    fn probe_payment(&self, staged: &StagedImport) -> Payment {
        let ts = extract_source_timestamp(&staged.raw, staged.source).unwrap_or(staged.received_at);
        let meta = VersionedMeta {
            source_created_at: ts,
            source_updated_at: ts,
            version_number: 0,
            version_history: Vec::new(),
            conflicts: Vec::new(),
        };
        Payment::from_raw(staged.staging_id.clone(), &staged.raw, staged.source, meta)
    }
}
