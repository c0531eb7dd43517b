use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainId, EntityId, MaterialId, OrderId};
use orderflow_orders::{DemandItem, ItemStatus, Order, OrderStatus, OrderType};

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageParams {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

impl PageParams {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches before pagination.
    pub total: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn from_matches(matches: Vec<T>, page: PageParams) -> Self {
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Self {
            items,
            total,
            offset: page.offset,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
        }
    }
}

/// Order search criteria; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub domain_id: Option<DomainId>,
    pub customer_id: Option<EntityId>,
    pub vendor_id: Option<EntityId>,
    /// Empty means any status.
    pub statuses: Vec<OrderStatus>,
    pub order_type: Option<OrderType>,
    pub exclude_transfers: bool,
    pub created_since: Option<DateTime<Utc>>,
    pub created_until: Option<DateTime<Utc>>,
    pub tag: Option<String>,
    pub reference_id: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.domain_id.is_none_or(|d| d == order.domain_id)
            && self.customer_id.is_none_or(|c| c == order.customer_id)
            && self.vendor_id.is_none_or(|v| Some(v) == order.vendor_id)
            && (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && self.order_type.is_none_or(|t| t == order.order_type)
            && !(self.exclude_transfers && order.order_type == OrderType::Transfer)
            && self.created_since.is_none_or(|s| order.created_at >= s)
            && self.created_until.is_none_or(|u| order.created_at <= u)
            && self.tag.as_ref().is_none_or(|t| order.order_tags.contains(t))
            && self
                .reference_id
                .as_deref()
                .is_none_or(|r| order.reference_id() == Some(r))
    }
}

/// Demand item search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandFilter {
    pub domain_id: Option<DomainId>,
    pub order_id: Option<OrderId>,
    /// Customer that placed the demand.
    pub entity_id: Option<EntityId>,
    pub vendor_id: Option<EntityId>,
    pub material_id: Option<MaterialId>,
    /// Only lines whose demand is still outstanding.
    pub open_only: bool,
    /// Only lines of backordered orders.
    pub backordered_only: bool,
    pub exclude_transfers: bool,
}

impl DemandFilter {
    pub fn matches(&self, order: &Order, item: &DemandItem) -> bool {
        self.domain_id.is_none_or(|d| d == order.domain_id)
            && self.order_id.is_none_or(|o| o == order.id)
            && self.entity_id.is_none_or(|e| e == item.entity_id)
            && self.vendor_id.is_none_or(|v| Some(v) == order.vendor_id)
            && self.material_id.is_none_or(|m| m == item.material_id)
            && (!self.open_only || item.status.is_open())
            && (!self.backordered_only
                || (order.status == OrderStatus::Backordered && item.status != ItemStatus::Cancelled))
            && !(self.exclude_transfers && order.order_type == OrderType::Transfer)
    }
}
