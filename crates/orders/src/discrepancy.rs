//! Discrepancy rules between ordering, shipping and fulfillment quantities.

use serde::{Deserialize, Serialize};

use crate::demand::{DemandItem, RecommendedQuantity};
use crate::status::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// Ordered quantity differs from the recommendation.
    OrderingDiscrepancy,
    /// Shipped quantity differs from the ordered quantity.
    ShippingDiscrepancy,
    /// Fulfilled quantity differs from the shipped quantity.
    FulfillmentDiscrepancy,
}

/// The quantities the rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscrepancySnapshot {
    pub original_quantity: i64,
    pub recommended: RecommendedQuantity,
    pub shipped_quantity: i64,
    pub fulfilled_quantity: i64,
}

impl From<&DemandItem> for DiscrepancySnapshot {
    fn from(item: &DemandItem) -> Self {
        Self {
            original_quantity: item.original_quantity,
            recommended: item.recommended,
            shipped_quantity: item.shipped_quantity,
            fulfilled_quantity: item.fulfilled_quantity,
        }
    }
}

/// Every discrepancy kind that applies to the item under the given order status.
pub fn classify(item: &DiscrepancySnapshot, status: OrderStatus) -> Vec<DiscrepancyKind> {
    let mut kinds = Vec::with_capacity(3);

    if let RecommendedQuantity::Quantity(roq) = item.recommended {
        if item.original_quantity != roq && status != OrderStatus::Cancelled {
            kinds.push(DiscrepancyKind::OrderingDiscrepancy);
        }
    }
    if item.shipped_quantity != item.original_quantity
        && matches!(status, OrderStatus::Completed | OrderStatus::Fulfilled)
    {
        kinds.push(DiscrepancyKind::ShippingDiscrepancy);
    }
    if item.fulfilled_quantity != item.shipped_quantity && status == OrderStatus::Fulfilled {
        kinds.push(DiscrepancyKind::FulfillmentDiscrepancy);
    }

    kinds
}
