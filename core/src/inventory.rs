//! Inventory recalculator — rebuilds a sellable item's derived counters
//! from the embedded tickets that reference it.
//!
//! The recompute is a full, stateless rebuild every time. No incremental
//! counter is trusted, which makes the operation idempotent and
//! self-healing after missed or duplicated triggers.

use crate::entities::{Registration, Ticket, TicketStatus};
use crate::error::{ReconError, ReconResult};
use crate::event::ReconEvent;
use crate::store::ReconStore;
use crate::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

/// One rebuilt counter set. `sold` excludes reserved and transferred
/// tickets so every ticket lands in exactly one bucket for capacity
/// purposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub sold: i64,
    pub reserved: i64,
    pub cancelled: i64,
    pub transferred: i64,
    pub available: i64,
    pub utilization_rate: f64,
}

/// Rebuild counters from a ticket set. Pure; the store is not consulted.
///
/// The raw non-cancelled sum counts reserved and transferred tickets too
/// (absent status defaults to sold at the decode boundary), so both are
/// subtracted back out of `sold`.
pub fn compute_counters(tickets: &[Ticket], total_capacity: i64) -> Counters {
    let mut sold_raw = 0i64;
    let mut reserved = 0i64;
    let mut cancelled = 0i64;
    let mut transferred = 0i64;

    for ticket in tickets {
        match ticket.status {
            TicketStatus::Cancelled => cancelled += ticket.quantity,
            TicketStatus::Reserved => {
                reserved += ticket.quantity;
                sold_raw += ticket.quantity;
            }
            TicketStatus::Transferred => {
                transferred += ticket.quantity;
                sold_raw += ticket.quantity;
            }
            TicketStatus::Sold => sold_raw += ticket.quantity,
        }
    }

    let sold = sold_raw - reserved - transferred;
    let used = sold + reserved;
    let available = (total_capacity - used).max(0);
    let utilization_rate = if total_capacity > 0 {
        (used as f64 / total_capacity as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    Counters {
        sold,
        reserved,
        cancelled,
        transferred,
        available,
        utilization_rate,
    }
}

/// Sellable items referenced by a registration's embedded tickets,
/// deduplicated, in first-seen order.
pub fn affected_sellable_items(registration: &Registration) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = Vec::new();
    for ticket in registration.decoded_tickets() {
        if let Some(id) = ticket.sellable_item_id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

pub struct Inventory<'a> {
    store: &'a ReconStore,
}

impl<'a> Inventory<'a> {
    pub fn new(store: &'a ReconStore) -> Self {
        Self { store }
    }

    /// Rebuild one sellable item's counters from every registration's
    /// embedded tickets and persist the result.
    pub fn recompute(&self, sellable_item_id: &str, now: Timestamp) -> ReconResult<Counters> {
        let item = self.store.get_sellable_item(sellable_item_id)?;
        let tickets: Vec<Ticket> = self
            .store
            .tickets_for_item(sellable_item_id)?
            .iter()
            .map(Ticket::from_raw)
            .collect();

        let counters = compute_counters(&tickets, item.total_capacity);
        self.store
            .update_sellable_counters(sellable_item_id, &counters, now)?;
        self.store.append_event(
            "inventory",
            &ReconEvent::InventoryRecomputed {
                sellable_item_id: sellable_item_id.to_string(),
                sold: counters.sold,
                reserved: counters.reserved,
                cancelled: counters.cancelled,
                available: counters.available,
            },
            now,
        )?;

        log::debug!(
            "inventory: {sellable_item_id} sold={} reserved={} cancelled={} available={}",
            counters.sold,
            counters.reserved,
            counters.cancelled,
            counters.available
        );
        Ok(counters)
    }

    /// Fan-out recompute for every sellable item a registration's tickets
    /// touch. Tickets referencing unknown items are reported and skipped;
    /// they must not sink the rest of the fan-out.
    pub fn recompute_affected(
        &self,
        registration: &Registration,
        now: Timestamp,
    ) -> ReconResult<Vec<(EntityId, Counters)>> {
        let mut results = Vec::new();
        for sellable_item_id in affected_sellable_items(registration) {
            match self.recompute(&sellable_item_id, now) {
                Ok(counters) => results.push((sellable_item_id, counters)),
                Err(ReconError::NotFound { .. }) => {
                    log::warn!(
                        "inventory: ticket references unknown sellable item {sellable_item_id}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Recompute every known sellable item. Used after whole-registration
    /// deletion, where the deleted tickets are no longer enumerable.
    pub fn recompute_all(&self, now: Timestamp) -> ReconResult<usize> {
        let ids = self.store.all_sellable_item_ids()?;
        let count = ids.len();
        for id in ids {
            self.recompute(&id, now)?;
        }
        Ok(count)
    }
}
