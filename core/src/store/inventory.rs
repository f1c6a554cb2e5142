use super::{json_col, ReconStore};
use crate::entities::SellableItem;
use crate::error::{ReconError, ReconResult};
use crate::inventory::Counters;
use crate::types::Timestamp;
use rusqlite::{params, OptionalExtension};

impl ReconStore {
    pub fn insert_sellable_item(
        &self,
        sellable_item_id: &str,
        name: &str,
        total_capacity: i64,
    ) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO sellable_items (sellable_item_id, name, total_capacity)
             VALUES (?1, ?2, ?3)",
            params![sellable_item_id, name, total_capacity],
        )?;
        Ok(())
    }

    pub fn get_sellable_item(&self, sellable_item_id: &str) -> ReconResult<SellableItem> {
        let mut stmt = self.conn.prepare(
            "SELECT sellable_item_id, name, total_capacity,
                    sold_count, reserved_count, cancelled_count, transferred_count,
                    available_count, utilization_rate, last_computed_at
             FROM sellable_items WHERE sellable_item_id = ?1",
        )?;
        stmt.query_row(params![sellable_item_id], |row| {
            Ok(SellableItem {
                sellable_item_id: row.get(0)?,
                name: row.get(1)?,
                total_capacity: row.get(2)?,
                sold_count: row.get(3)?,
                reserved_count: row.get(4)?,
                cancelled_count: row.get(5)?,
                transferred_count: row.get(6)?,
                available_count: row.get(7)?,
                utilization_rate: row.get(8)?,
                last_computed_at: row.get(9)?,
            })
        })
        .optional()?
        .ok_or_else(|| ReconError::NotFound {
            entity: "sellable item",
            id: sellable_item_id.to_string(),
        })
    }

    pub fn all_sellable_item_ids(&self) -> ReconResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT sellable_item_id FROM sellable_items ORDER BY sellable_item_id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Write a freshly rebuilt counter set onto a sellable item.
    pub fn update_sellable_counters(
        &self,
        sellable_item_id: &str,
        counters: &Counters,
        now: Timestamp,
    ) -> ReconResult<()> {
        self.conn.execute(
            "UPDATE sellable_items SET
                sold_count = ?2, reserved_count = ?3, cancelled_count = ?4,
                transferred_count = ?5, available_count = ?6, utilization_rate = ?7,
                last_computed_at = ?8
             WHERE sellable_item_id = ?1",
            params![
                sellable_item_id,
                counters.sold,
                counters.reserved,
                counters.cancelled,
                counters.transferred,
                counters.available,
                counters.utilization_rate,
                now,
            ],
        )?;
        Ok(())
    }

    /// All embedded tickets across all registrations that reference the
    /// given sellable item, under either the canonical or the legacy key.
    pub fn tickets_for_item(&self, sellable_item_id: &str) -> ReconResult<Vec<serde_json::Value>> {
        let mut stmt = self.conn.prepare(
            "SELECT j.value FROM registrations r, json_each(r.tickets) j
             WHERE json_extract(j.value, '$.sellableItemId') = ?1
                OR json_extract(j.value, '$.eventTicketId') = ?1",
        )?;
        let tickets = stmt
            .query_map(params![sellable_item_id], |row| json_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tickets)
    }
}
