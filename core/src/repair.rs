//! Repair sweep — detects and heals one-sided payment/registration links.
//!
//! The import path commits both sides of a link in one transaction, so the
//! sweep finds nothing in normal operation. It is the documented
//! compensating path for deployments where the two sides live in separate
//! stores and a crash can leave half a link behind.

use crate::config::ReconConfig;
use crate::error::ReconResult;
use crate::event::ReconEvent;
use crate::store::ReconStore;
use crate::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairReport {
    pub scanned: usize,
    pub repaired: usize,
    pub lines: Vec<RepairLine>,
    /// Links that could not be healed automatically. Flagged for manual
    /// repair, never swallowed.
    pub inconsistent: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairLine {
    pub payment_id: EntityId,
    pub registration_id: EntityId,
    pub side: String,
}

pub struct Repair<'a> {
    store: &'a ReconStore,
    config: &'a ReconConfig,
}

impl<'a> Repair<'a> {
    pub fn new(store: &'a ReconStore, config: &'a ReconConfig) -> Self {
        Self { store, config }
    }

    /// Scan both directions for one-sided links and restore the missing
    /// side. A manual or invoiced match is authoritative: the sweep repairs
    /// toward the payment's recorded link and never overwrites it.
    pub fn repair_sweep(&self, now: Timestamp) -> ReconResult<RepairReport> {
        let mut report = RepairReport::default();

        // Forward links: payment -> registration without the back-link.
        for payment in self.store.matched_payments()? {
            report.scanned += 1;
            let Some(registration_id) = payment.matched_registration_id.clone() else {
                continue;
            };
            match self.store.find_registration(&registration_id)? {
                Some(registration) => {
                    if registration.linked_payment_id.as_deref() == Some(payment.payment_id.as_str()) {
                        continue;
                    }
                    self.store.set_registration_link(
                        &registration_id,
                        &payment.payment_id,
                        payment.source,
                        payment.gateway_payment_id(),
                        "repair-sweep",
                        now,
                    )?;
                    self.record_repair(&mut report, &payment.payment_id, &registration_id, "registration", now)?;
                }
                None => {
                    let detail = format!(
                        "payment {} links to missing registration {registration_id}",
                        payment.payment_id
                    );
                    log::warn!("repair: {detail}");
                    report.inconsistent.push(detail);
                }
            }
        }

        // Back links: registration -> payment without the forward link.
        for registration in self.store.linked_registrations()? {
            report.scanned += 1;
            let Some(payment_id) = registration.linked_payment_id.clone() else {
                continue;
            };
            match self.store.find_payment(&payment_id)? {
                Some(payment) => {
                    match payment.matched_registration_id.as_deref() {
                        Some(id) if id == registration.registration_id => {}
                        Some(other) => {
                            // The payment's recorded link wins; this
                            // back-link is stale and needs a human.
                            let detail = format!(
                                "registration {} back-links payment {payment_id}, which is matched to {other}",
                                registration.registration_id
                            );
                            log::warn!("repair: {detail}");
                            report.inconsistent.push(detail);
                        }
                        None => {
                            self.store.set_payment_match(
                                &payment_id,
                                &registration.registration_id,
                                "repair_sweep",
                                self.config.exact_match_confidence,
                                "repair-sweep",
                                now,
                            )?;
                            self.record_repair(
                                &mut report,
                                &payment_id,
                                &registration.registration_id,
                                "payment",
                                now,
                            )?;
                        }
                    }
                }
                None => {
                    let detail = format!(
                        "registration {} back-links missing payment {payment_id}",
                        registration.registration_id
                    );
                    log::warn!("repair: {detail}");
                    report.inconsistent.push(detail);
                }
            }
        }

        log::info!(
            "repair: scanned={} repaired={} inconsistent={}",
            report.scanned,
            report.repaired,
            report.inconsistent.len()
        );
        Ok(report)
    }

    fn record_repair(
        &self,
        report: &mut RepairReport,
        payment_id: &str,
        registration_id: &str,
        side: &str,
        now: Timestamp,
    ) -> ReconResult<()> {
        report.repaired += 1;
        report.lines.push(RepairLine {
            payment_id: payment_id.to_string(),
            registration_id: registration_id.to_string(),
            side: side.to_string(),
        });
        self.store.append_event(
            "repair",
            &ReconEvent::LinkRepaired {
                payment_id: payment_id.to_string(),
                registration_id: registration_id.to_string(),
                side: side.to_string(),
            },
            now,
        )?;
        Ok(())
    }
}
