use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use orderflow_core::{EntityId, MaterialId};

/// Replenishment model configured for an inventory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryModel {
    /// Min/max (or unconfigured) replenishment.
    #[default]
    MinMax,
    /// Service-quantity model: reorder the economic order quantity.
    ServiceQuantity,
}

/// Point-in-time view of one material's stock at one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub entity_id: EntityId,
    pub material_id: MaterialId,
    pub model: InventoryModel,
    pub stock: i64,
    pub expired_stock: i64,
    pub in_transit_stock: i64,
    pub max_stock: i64,
    pub economic_order_quantity: i64,
    /// Entity-specific retail price override in smallest currency unit (0 = none).
    pub retail_price: u64,
    /// Tax in basis points.
    pub tax_bps: u32,
    pub entity_tags: Vec<String>,
    pub material_tags: Vec<String>,
}

impl InventorySnapshot {
    pub fn new(entity_id: EntityId, material_id: MaterialId) -> Self {
        Self {
            entity_id,
            material_id,
            model: InventoryModel::default(),
            stock: 0,
            expired_stock: 0,
            in_transit_stock: 0,
            max_stock: 0,
            economic_order_quantity: 0,
            retail_price: 0,
            tax_bps: 0,
            entity_tags: Vec::new(),
            material_tags: Vec::new(),
        }
    }

    /// Stock that can still be consumed (on hand minus expired).
    pub fn usable_stock(&self) -> i64 {
        self.stock - self.expired_stock
    }
}

/// A quantity of stock on hand, optionally tracked as a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    /// `None` for materials without batch management.
    pub batch_id: Option<String>,
    pub on_hand: i64,
    pub expiry: Option<NaiveDate>,
}

impl StockBatch {
    pub fn unbatched(on_hand: i64) -> Self {
        Self {
            batch_id: None,
            on_hand,
            expiry: None,
        }
    }

    pub fn batch(batch_id: impl Into<String>, on_hand: i64, expiry: Option<NaiveDate>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            on_hand,
            expiry,
        }
    }
}
