//! Read paths over orders, demand and allocations, plus bulk allocation release.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use orderflow_core::{DomainError, DomainId, DomainResult, EntityId, MaterialId, OrderId};
use orderflow_inventory::{AllocationTag, InventoryAllocator, OperationType};
use orderflow_orders::{
    DemandItem, DiscrepancyKind, DiscrepancySnapshot, Order, OrderStatus, OrderType,
    RecommendedQuantity, StatusHistoryEntry, classify,
};

use crate::collaborators::{EntityCatalog, MaterialCatalog};
use crate::repository::{DemandFilter, OrderFilter, OrderRepository, Page, PageParams};

/// Discrepancy search criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyCriteria {
    pub domain_id: Option<DomainId>,
    pub kind: Option<DiscrepancyKind>,
    pub order_id: Option<OrderId>,
    pub material_id: Option<MaterialId>,
    /// Matches either the customer or the vendor.
    pub entity_id: Option<EntityId>,
    pub order_type: Option<OrderType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// One demand item with at least one discrepancy, enriched for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyModel {
    pub order_id: OrderId,
    pub domain_id: DomainId,
    pub order_type: OrderType,
    pub order_status: OrderStatus,
    pub material_id: MaterialId,
    pub material_name: Option<String>,
    pub customer_id: EntityId,
    pub customer_name: Option<String>,
    pub vendor_id: Option<EntityId>,
    pub vendor_name: Option<String>,
    pub original_quantity: i64,
    pub recommended: RecommendedQuantity,
    pub quantity: i64,
    pub shipped_quantity: i64,
    pub fulfilled_quantity: i64,
    pub kinds: Vec<DiscrepancyKind>,
    pub ordering_discrepancy_reason: Option<String>,
    pub shipped_discrepancy_reason: Option<String>,
    pub cancelled_discrepancy_reason: Option<String>,
    pub status_updated_at: DateTime<Utc>,
}

/// Release order reservations held at a vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearAllocationsRequest {
    pub vendor_id: EntityId,
    pub material_id: Option<MaterialId>,
    /// A single order; otherwise every open order serviced by the vendor.
    pub order_id: Option<OrderId>,
    pub exclude_transfers: bool,
    pub backordered_only: bool,
}

impl ClearAllocationsRequest {
    pub fn for_vendor(vendor_id: EntityId) -> Self {
        Self {
            vendor_id,
            material_id: None,
            order_id: None,
            exclude_transfers: false,
            backordered_only: false,
        }
    }
}

pub struct OrderQueries<R, A> {
    repo: R,
    allocator: A,
    materials: Arc<dyn MaterialCatalog>,
    entities: Arc<dyn EntityCatalog>,
}

impl<R, A> core::fmt::Debug for OrderQueries<R, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderQueries").finish_non_exhaustive()
    }
}

impl<R, A> OrderQueries<R, A>
where
    R: OrderRepository,
    A: InventoryAllocator,
{
    pub fn new(
        repo: R,
        allocator: A,
        materials: Arc<dyn MaterialCatalog>,
        entities: Arc<dyn EntityCatalog>,
    ) -> Self {
        Self {
            repo,
            allocator,
            materials,
            entities,
        }
    }

    pub fn get_orders(&self, filter: &OrderFilter, page: PageParams) -> DomainResult<Page<Order>> {
        Ok(self.repo.list_orders(filter, page)?)
    }

    pub fn get_demand_items(&self, filter: &DemandFilter, page: PageParams) -> DomainResult<Page<DemandItem>> {
        Ok(self.repo.demand_items(filter, page)?.map(|(item, _)| item))
    }

    pub fn status_history(&self, order_id: OrderId) -> DomainResult<Vec<StatusHistoryEntry>> {
        Ok(self.repo.status_history(order_id)?)
    }

    /// Time from order creation until it was first marked fulfilled.
    ///
    /// `None` while the order has not reached `fulfilled`.
    pub fn lead_time(&self, order_id: OrderId) -> DomainResult<Option<Duration>> {
        let order = self
            .repo
            .get_order(order_id)?
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;
        let fulfilled_at = self
            .repo
            .status_history(order_id)?
            .into_iter()
            .filter(|e| e.new_status == OrderStatus::Fulfilled)
            .map(|e| e.at)
            .min();
        Ok(fulfilled_at.map(|at| at - order.created_at))
    }

    /// Demand items with discrepancies, most recently status-updated orders first.
    pub fn get_discrepancy_models(
        &self,
        criteria: &DiscrepancyCriteria,
        page: PageParams,
    ) -> DomainResult<Page<DiscrepancyModel>> {
        let filter = DemandFilter {
            domain_id: criteria.domain_id,
            order_id: criteria.order_id,
            material_id: criteria.material_id,
            ..DemandFilter::default()
        };
        let mut models: Vec<DiscrepancyModel> = self
            .repo
            .demand_items(&filter, PageParams::all())?
            .items
            .into_iter()
            .filter(|(_, order)| criteria_matches_order(criteria, order))
            .filter_map(|(item, order)| {
                let kinds = classify(&DiscrepancySnapshot::from(&item), order.status);
                let wanted = match criteria.kind {
                    Some(kind) => kinds.contains(&kind),
                    None => !kinds.is_empty(),
                };
                wanted.then(|| self.discrepancy_model(&item, &order, kinds))
            })
            .collect();

        models.sort_by(|a, b| b.status_updated_at.cmp(&a.status_updated_at));
        Ok(Page::from_matches(models, page))
    }

    /// Release `ORDER:{id}` reservations for one order or every matching open order.
    /// Returns the number of allocations released.
    #[instrument(skip_all, fields(vendor_id = %request.vendor_id))]
    pub fn clear_allocations(&self, request: &ClearAllocationsRequest) -> DomainResult<usize> {
        let order_ids: Vec<OrderId> = match request.order_id {
            Some(id) => vec![id],
            None => {
                let statuses = if request.backordered_only {
                    vec![OrderStatus::Backordered]
                } else {
                    vec![OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Backordered]
                };
                let filter = OrderFilter {
                    vendor_id: Some(request.vendor_id),
                    statuses,
                    exclude_transfers: request.exclude_transfers,
                    ..OrderFilter::default()
                };
                self.repo
                    .list_orders(&filter, PageParams::all())?
                    .items
                    .iter()
                    .map(|o| o.id)
                    .collect()
            }
        };

        let mut released = 0;
        for order_id in order_ids {
            let tag = AllocationTag::order(order_id);
            match self
                .allocator
                .clear_allocation_by_tag(Some(request.vendor_id), request.material_id, &tag)
            {
                Ok(n) => released += n,
                Err(e) => warn!(%tag, error = %e, "unable to release allocations"),
            }
        }
        info!(released, "allocations cleared");
        Ok(released)
    }

    /// Quantity reserved at the vendor for one line of an order.
    pub fn allocated_quantity(&self, order: &Order, material_id: MaterialId) -> DomainResult<i64> {
        let Some(vendor_id) = order.vendor_id else {
            return Ok(0);
        };
        let allocations = self.allocator.get_allocations_by_type_id(
            vendor_id,
            material_id,
            OperationType::Order,
            &order.id.to_string(),
        )?;
        Ok(allocations.iter().map(|a| a.quantity).sum())
    }

    /// Material status stamped on the line's reservation, if any.
    pub fn material_status(&self, order: &Order, material_id: MaterialId) -> DomainResult<Option<String>> {
        let Some(vendor_id) = order.vendor_id else {
            return Ok(None);
        };
        let allocations = self.allocator.get_allocations_by_type_id(
            vendor_id,
            material_id,
            OperationType::Order,
            &order.id.to_string(),
        )?;
        Ok(allocations.into_iter().find_map(|a| a.material_status))
    }

    fn discrepancy_model(&self, item: &DemandItem, order: &Order, kinds: Vec<DiscrepancyKind>) -> DiscrepancyModel {
        DiscrepancyModel {
            order_id: order.id,
            domain_id: order.domain_id,
            order_type: order.order_type,
            order_status: order.status,
            material_id: item.material_id,
            material_name: self.materials.material(item.material_id).map(|m| m.name),
            customer_id: order.customer_id,
            customer_name: self.entities.entity(order.customer_id).map(|e| e.name),
            vendor_id: order.vendor_id,
            vendor_name: order
                .vendor_id
                .and_then(|v| self.entities.entity(v))
                .map(|e| e.name),
            original_quantity: item.original_quantity,
            recommended: item.recommended,
            quantity: item.quantity,
            shipped_quantity: item.shipped_quantity,
            fulfilled_quantity: item.fulfilled_quantity,
            kinds,
            ordering_discrepancy_reason: item.ordering_discrepancy_reason.clone(),
            shipped_discrepancy_reason: item.shipped_discrepancy_reason.clone(),
            cancelled_discrepancy_reason: order.cancelled_discrepancy_reason.clone(),
            status_updated_at: order.status_updated_at,
        }
    }
}

fn criteria_matches_order(criteria: &DiscrepancyCriteria, order: &Order) -> bool {
    criteria
        .entity_id
        .is_none_or(|e| e == order.customer_id || Some(e) == order.vendor_id)
        && criteria.order_type.is_none_or(|t| t == order.order_type)
        && criteria.since.is_none_or(|s| order.created_at >= s)
        && criteria.until.is_none_or(|u| order.created_at <= u)
}
