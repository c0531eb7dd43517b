use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{EntityId, MaterialId, OrderId, UserId};
use orderflow_inventory::{InventoryModel, InventorySnapshot};

use crate::status::ItemStatus;

/// Recommended order quantity; `-1` on the wire means "not applicable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum RecommendedQuantity {
    #[default]
    NotApplicable,
    Quantity(i64),
}

impl RecommendedQuantity {
    pub const SENTINEL: i64 = -1;

    pub fn as_i64(&self) -> i64 {
        match self {
            RecommendedQuantity::NotApplicable => Self::SENTINEL,
            RecommendedQuantity::Quantity(q) => *q,
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, RecommendedQuantity::Quantity(_))
    }
}

impl From<i64> for RecommendedQuantity {
    fn from(value: i64) -> Self {
        if value == Self::SENTINEL {
            RecommendedQuantity::NotApplicable
        } else {
            RecommendedQuantity::Quantity(value)
        }
    }
}

impl From<RecommendedQuantity> for i64 {
    fn from(value: RecommendedQuantity) -> Self {
        value.as_i64()
    }
}

/// Quantity the entity should order to get back to its configured stock level.
pub fn compute_recommended_order_quantity(inv: &InventorySnapshot) -> RecommendedQuantity {
    if inv.model == InventoryModel::ServiceQuantity {
        return RecommendedQuantity::Quantity(inv.economic_order_quantity.max(0));
    }
    if inv.max_stock > 0 {
        let usable = inv.usable_stock();
        let projected = usable + inv.in_transit_stock;
        let q = if projected < inv.max_stock {
            inv.max_stock - projected
        } else {
            0
        };
        return RecommendedQuantity::Quantity(q);
    }
    RecommendedQuantity::NotApplicable
}

/// A requested quantity of one material within an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandItem {
    pub order_id: OrderId,
    pub material_id: MaterialId,
    /// Entity that placed the demand (the order's customer).
    pub entity_id: EntityId,
    pub quantity: i64,
    pub original_quantity: i64,
    pub recommended: RecommendedQuantity,
    pub shipped_quantity: i64,
    pub fulfilled_quantity: i64,
    pub status: ItemStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
    /// Reason given when the edited quantity diverges from the recommendation.
    pub ordering_discrepancy_reason: Option<String>,
    pub shipped_discrepancy_reason: Option<String>,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub currency: Option<String>,
    pub tax_bps: u32,
    /// Days elapsed since the stock crossed its reorder point.
    pub time_to_order: Option<f64>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: UserId,
    pub tags: Vec<String>,
}

impl DemandItem {
    pub fn new(
        order_id: OrderId,
        entity_id: EntityId,
        material_id: MaterialId,
        quantity: i64,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            material_id,
            entity_id,
            quantity,
            original_quantity: 0,
            recommended: RecommendedQuantity::NotApplicable,
            shipped_quantity: 0,
            fulfilled_quantity: 0,
            status: ItemStatus::Pending,
            reason: None,
            message: None,
            ordering_discrepancy_reason: None,
            shipped_discrepancy_reason: None,
            unit_price: 0,
            currency: None,
            tax_bps: 0,
            time_to_order: None,
            updated_at: at,
            updated_by: actor,
            tags: Vec::new(),
        }
    }

    pub fn with_recommended(mut self, recommended: RecommendedQuantity) -> Self {
        self.recommended = recommended;
        self
    }

    pub fn with_pricing(mut self, unit_price: u64, currency: Option<String>, tax_bps: u32) -> Self {
        self.unit_price = unit_price;
        self.currency = currency;
        self.tax_bps = tax_bps;
        self
    }

    pub fn with_time_to_order(mut self, days: Option<f64>) -> Self {
        self.time_to_order = days;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Quantity times unit price; `None` when the product overflows.
    pub fn line_total(&self) -> Option<u64> {
        u64::try_from(self.quantity).unwrap_or(0).checked_mul(self.unit_price)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ItemStatus::Cancelled
    }

    /// Every unit requested has left the vendor.
    pub fn is_fully_shipped(&self) -> bool {
        self.shipped_quantity >= self.quantity
    }
}

/// One requested change to an order's demand.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DemandEdit {
    pub material_id: Option<MaterialId>,
    pub quantity: i64,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub ordering_discrepancy_reason: Option<String>,
    /// Explains a shortfall between shipped and ordered quantity.
    pub shipped_discrepancy_reason: Option<String>,
}

impl DemandEdit {
    pub fn new(material_id: MaterialId, quantity: i64) -> Self {
        Self {
            material_id: Some(material_id),
            quantity,
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_shipped_discrepancy_reason(mut self, reason: impl Into<String>) -> Self {
        self.shipped_discrepancy_reason = Some(reason.into());
        self
    }
}

/// What [`DemandLedger::apply_edit`] did with an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Existing item now carries the new quantity (status `Changed`).
    Updated,
    /// Existing item was edited down to zero (status `Cancelled`).
    Cancelled,
    /// No item for the material yet; the caller builds one and calls `add`.
    Missing,
    /// Negative quantity; nothing changed.
    Skipped,
}

/// Quantity bookkeeping over an order's demand items.
#[derive(Debug)]
pub struct DemandLedger<'a> {
    items: &'a mut Vec<DemandItem>,
}

impl<'a> DemandLedger<'a> {
    pub fn new(items: &'a mut Vec<DemandItem>) -> Self {
        Self { items }
    }

    pub fn find(&self, material_id: MaterialId) -> Option<&DemandItem> {
        self.items.iter().find(|i| i.material_id == material_id)
    }

    /// Add a new line. `original_quantity` is filled from `quantity` while still zero.
    pub fn add(&mut self, mut item: DemandItem) {
        if item.original_quantity == 0 {
            item.original_quantity = item.quantity;
        }
        self.items.push(item);
    }

    /// Apply an edit to the existing line for its material.
    pub fn apply_edit(&mut self, edit: &DemandEdit, actor: &UserId, at: DateTime<Utc>) -> EditOutcome {
        if edit.quantity < 0 {
            return EditOutcome::Skipped;
        }
        let Some(material_id) = edit.material_id else {
            return EditOutcome::Skipped;
        };
        let Some(item) = self.items.iter_mut().find(|i| i.material_id == material_id) else {
            return EditOutcome::Missing;
        };

        item.quantity = edit.quantity;
        if edit.reason.is_some() {
            item.reason.clone_from(&edit.reason);
        }
        if edit.message.is_some() {
            item.message.clone_from(&edit.message);
        }
        if edit.ordering_discrepancy_reason.is_some() {
            item.ordering_discrepancy_reason
                .clone_from(&edit.ordering_discrepancy_reason);
        }
        if edit.shipped_discrepancy_reason.is_some() {
            item.shipped_discrepancy_reason
                .clone_from(&edit.shipped_discrepancy_reason);
        }
        item.updated_at = at;
        item.updated_by = actor.clone();

        if edit.quantity == 0 {
            item.status = ItemStatus::Cancelled;
            EditOutcome::Cancelled
        } else {
            item.status = ItemStatus::Changed;
            EditOutcome::Updated
        }
    }

    /// True when no line has a positive quantity.
    pub fn all_zero(&self) -> bool {
        self.items.iter().all(|i| i.quantity == 0)
    }
}
