//! Order lifecycle orchestration.
//!
//! Every mutation of a single order runs as: acquire the order lock, load,
//! validate, mutate, commit one [`OrderUnit`], release the lock, then notify.
//! Inventory allocation runs beside the commit, never inside it: a failed
//! reservation is logged and the order operation carries on.

mod create;
mod modify;
mod status;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use orderflow_core::{
    DomainError, DomainId, DomainResult, EntityId, MaterialId, OrderId, ShipmentId, UserId, codes,
};
use orderflow_events::{EventEnvelope, NotifyOptions};
use orderflow_inventory::{AllocationRequest, AllocationTag, InventoryAllocator};
use orderflow_orders::{
    DemandEdit, DemandItem, ItemStatus, Order, OrderEvent, OrderEventKind, OrderStatus, OrderType,
    PaymentRecord, RecommendedQuantity, compute_recommended_order_quantity,
};

use crate::collaborators::{Activity, Collaborators, ShipmentRequest};
use crate::config::{DomainConfigProvider, OrdersConfig};
use crate::lock::LockManager;
use crate::repository::OrderRepository;

pub(crate) const ORDER_OBJECT: &str = "order";

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub material_id: MaterialId,
    pub quantity: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub domain_id: DomainId,
    pub customer_id: EntityId,
    /// Falls back to the customer's default vendor.
    pub vendor_id: Option<EntityId>,
    pub order_type: OrderType,
    pub lines: Vec<LineRequest>,
    pub tags: Vec<String>,
    pub reference_id: Option<String>,
    pub payment: Option<PaymentRecord>,
    pub message: Option<String>,
    /// Ask for the order to start confirmed (sales orders, when the domain allows it).
    pub confirm: bool,
    pub allow_empty: bool,
    pub validate_handling_units: bool,
    pub visible_to_customer: bool,
    pub visible_to_vendor: bool,
    pub actor: UserId,
}

impl CreateOrderRequest {
    pub fn new(domain_id: DomainId, customer_id: EntityId, order_type: OrderType, actor: UserId) -> Self {
        Self {
            domain_id,
            customer_id,
            vendor_id: None,
            order_type,
            lines: Vec::new(),
            tags: Vec::new(),
            reference_id: None,
            payment: None,
            message: None,
            confirm: false,
            allow_empty: false,
            validate_handling_units: false,
            visible_to_customer: true,
            visible_to_vendor: true,
            actor,
        }
    }

    pub fn with_vendor(mut self, vendor_id: EntityId) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn with_line(mut self, material_id: MaterialId, quantity: i64) -> Self {
        self.lines.push(LineRequest {
            material_id,
            quantity,
            reason: None,
        });
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn with_payment(mut self, payment: PaymentRecord) -> Self {
        self.payment = Some(payment);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirm = true;
        self
    }

    pub fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    pub fn validating_handling_units(mut self) -> Self {
        self.validate_handling_units = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub order_id: OrderId,
    pub new_status: OrderStatus,
    pub actor: UserId,
    pub message: Option<String>,
    pub notify_user_ids: Vec<UserId>,
    /// Discrepancy reason recorded on cancellation.
    pub reason: Option<String>,
}

impl UpdateStatusRequest {
    pub fn new(order_id: OrderId, new_status: OrderStatus, actor: UserId) -> Self {
        Self {
            order_id,
            new_status,
            actor,
            message: None,
            notify_user_ids: Vec::new(),
            reason: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn notifying(mut self, user_ids: Vec<UserId>) -> Self {
        self.notify_user_ids = user_ids;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOrderOptions {
    pub actor: UserId,
    pub validate_handling_units: bool,
    pub notify: NotifyOptions,
}

impl UpdateOrderOptions {
    pub fn new(actor: UserId) -> Self {
        Self {
            actor,
            validate_handling_units: false,
            notify: NotifyOptions::default(),
        }
    }

    pub fn validating_handling_units(mut self) -> Self {
        self.validate_handling_units = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModifyOrderRequest {
    pub edits: Vec<DemandEdit>,
    pub allow_empty: bool,
    pub validate_handling_units: bool,
    /// Replaces the order tags when set.
    pub order_tags: Option<Vec<String>>,
    pub payment: Option<PaymentRecord>,
    pub reference_id: Option<String>,
    pub message: Option<String>,
}

impl ModifyOrderRequest {
    pub fn new(edits: Vec<DemandEdit>) -> Self {
        Self {
            edits,
            ..Self::default()
        }
    }

    pub fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipNowRequest {
    pub order_id: OrderId,
    pub carrier: Option<String>,
    pub tracking_id: Option<String>,
    /// Empty ships whatever is still outstanding.
    pub items: Vec<(MaterialId, i64)>,
    pub actor: UserId,
}

/// Result of a status or order update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedOrder {
    pub order: Order,
    /// `false` when the call was a no-op.
    pub changed: bool,
    pub message_id: Option<String>,
}

impl UpdatedOrder {
    fn unchanged(order: Order) -> Self {
        Self {
            order,
            changed: false,
            message_id: None,
        }
    }
}

/// Events gathered while the lock is held and published after it is released.
#[derive(Debug, Default)]
struct PendingEvents(Vec<(OrderEventKind, NotifyOptions)>);

impl PendingEvents {
    fn push(&mut self, kind: OrderEventKind, notify: NotifyOptions) {
        self.0.push((kind, notify));
    }
}

/// Top-level orchestrator for order creation, edits and status changes.
pub struct OrderLifecycleManager<R, L, A> {
    repo: R,
    locks: L,
    allocator: A,
    config: Arc<dyn DomainConfigProvider>,
    services: Collaborators,
}

impl<R, L, A> core::fmt::Debug for OrderLifecycleManager<R, L, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OrderLifecycleManager").finish_non_exhaustive()
    }
}

impl<R, L, A> OrderLifecycleManager<R, L, A>
where
    R: OrderRepository,
    L: LockManager,
    A: InventoryAllocator,
{
    pub fn new(
        repo: R,
        locks: L,
        allocator: A,
        config: Arc<dyn DomainConfigProvider>,
        services: Collaborators,
    ) -> Self {
        Self {
            repo,
            locks,
            allocator,
            config,
            services,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn locks(&self) -> &L {
        &self.locks
    }

    /// Post a free-text message on the order's thread and announce it.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub fn add_message_to_order(
        &self,
        order_id: OrderId,
        text: &str,
        actor: &UserId,
        notify_user_ids: Vec<UserId>,
    ) -> DomainResult<String> {
        let order = self.load(order_id)?;
        let message_id =
            self.services
                .conversations
                .add_message(ORDER_OBJECT, &order_id.to_string(), text, actor)?;

        let mut events = PendingEvents::default();
        events.push(
            OrderEventKind::Commented,
            NotifyOptions {
                message: Some(text.to_string()),
                user_ids: notify_user_ids,
            },
        );
        self.publish(&order, events);
        Ok(message_id)
    }

    /// Hand the order's outstanding (or the listed) quantities to the shipment service.
    #[instrument(skip_all, fields(order_id = %request.order_id))]
    pub fn ship_now(&self, request: ShipNowRequest) -> DomainResult<ShipmentId> {
        let order = self.load(request.order_id)?;
        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Backordered
        ) {
            return Err(DomainError::validation_with_args(
                codes::ILLEGAL_TRANSITION,
                format!("order {} in status {} cannot be shipped", order.id, order.status),
                [order.id.to_string(), order.status.code().to_string()],
            ));
        }

        let items: Vec<(MaterialId, i64)> = if request.items.is_empty() {
            order
                .items
                .iter()
                .filter(|i| !i.is_cancelled())
                .map(|i| (i.material_id, i.quantity - i.shipped_quantity))
                .filter(|(_, q)| *q > 0)
                .collect()
        } else {
            for &(material_id, quantity) in &request.items {
                if quantity <= 0 {
                    return Err(DomainError::validation_with_args(
                        codes::NEGATIVE_QUANTITY,
                        format!("shipment quantity {quantity} for material {material_id} must be positive"),
                        [material_id.to_string(), quantity.to_string()],
                    ));
                }
                if !order.item(material_id).is_some_and(|i| !i.is_cancelled()) {
                    return Err(DomainError::not_found(format!(
                        "material {material_id} on order {}",
                        order.id
                    )));
                }
            }
            request.items
        };
        if items.is_empty() {
            return Err(DomainError::validation(
                codes::EMPTY_ORDER,
                format!("order {} has nothing left to ship", order.id),
            ));
        }

        let shipment_id = self.services.shipments.create_shipment(ShipmentRequest {
            order_id: order.id,
            vendor_id: order.vendor_id,
            customer_id: order.customer_id,
            carrier: request.carrier,
            tracking_id: request.tracking_id,
            items,
            actor: request.actor.clone(),
        })?;

        info!(%shipment_id, "shipment created");
        self.record_activity(&order, "shipment", None, Some(shipment_id.to_string()), &request.actor);
        Ok(shipment_id)
    }

    /// Recommended order quantity for a material at an entity.
    pub fn compute_recommended_order_quantity(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
    ) -> DomainResult<RecommendedQuantity> {
        let inv = self
            .services
            .inventory
            .inventory(entity_id, material_id)
            .ok_or_else(|| unavailable(material_id, entity_id))?;
        Ok(compute_recommended_order_quantity(&inv))
    }

    fn load(&self, order_id: OrderId) -> DomainResult<Order> {
        self.repo
            .get_order(order_id)?
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))
    }

    fn orders_config(&self, domain_id: DomainId) -> OrdersConfig {
        self.config.orders_config(domain_id)
    }

    /// Build a priced demand line from catalog and inventory data.
    fn build_item(
        &self,
        order: &Order,
        material_id: MaterialId,
        quantity: i64,
        actor: &UserId,
        at: DateTime<Utc>,
    ) -> DomainResult<DemandItem> {
        let material = self
            .services
            .materials
            .material(material_id)
            .ok_or_else(|| DomainError::not_found(format!("material {material_id}")))?;
        let inv = self
            .services
            .inventory
            .inventory(order.customer_id, material_id)
            .ok_or_else(|| unavailable(material_id, order.customer_id))?;

        let unit_price = if inv.retail_price > 0 {
            inv.retail_price
        } else {
            material.retail_price
        };
        let time_to_order = self
            .services
            .inventory
            .duration_from_reorder_point(order.customer_id, material_id);

        Ok(
            DemandItem::new(order.id, order.customer_id, material_id, quantity, actor.clone(), at)
                .with_recommended(compute_recommended_order_quantity(&inv))
                .with_pricing(unit_price, order.currency.clone(), inv.tax_bps)
                .with_time_to_order(time_to_order)
                .with_tags(material.tags),
        )
    }

    fn validate_handling_unit(&self, material_id: MaterialId, quantity: i64) -> DomainResult<()> {
        let Some(unit) = self.services.handling_units.handling_unit(material_id) else {
            return Ok(());
        };
        if unit.quantity > 0 && quantity % unit.quantity != 0 {
            return Err(DomainError::validation_with_args(
                codes::HANDLING_UNIT_MISMATCH,
                format!(
                    "quantity {quantity} of material {material_id} is not a multiple of {} ({})",
                    unit.quantity, unit.name
                ),
                [
                    material_id.to_string(),
                    quantity.to_string(),
                    unit.name,
                    unit.quantity.to_string(),
                ],
            ));
        }
        Ok(())
    }

    /// Reserve vendor stock for every live line. Returns the materials that
    /// were reserved in full; failures are logged and skipped.
    fn allocate_items(
        &self,
        order: &Order,
        cfg: &OrdersConfig,
        actor: &UserId,
        use_original_quantity: bool,
    ) -> Vec<MaterialId> {
        let Some(vendor_id) = order.vendor_id else {
            warn!(order_id = %order.id, "order has no vendor; skipping allocation");
            return Vec::new();
        };
        let tag = AllocationTag::order(order.id);
        let mut allocated = Vec::new();

        for item in order.items.iter().filter(|i| !i.is_cancelled()) {
            let quantity = if use_original_quantity {
                item.original_quantity
            } else {
                item.quantity
            };
            if quantity <= 0 {
                continue;
            }
            let request = AllocationRequest {
                entity_id: vendor_id,
                material_id: item.material_id,
                tag: tag.clone(),
                quantity,
                actor: actor.clone(),
                auto_assign_first_status: cfg.auto_assign_first_material_status,
            };
            match self.allocator.allocate_automatically(&request) {
                Ok(_) => allocated.push(item.material_id),
                Err(e) => warn!(
                    order_id = %order.id,
                    entity_id = %vendor_id,
                    material_id = %item.material_id,
                    quantity,
                    error = %e,
                    "allocation failed; continuing"
                ),
            }
        }
        allocated
    }

    fn release_allocations(&self, order: &Order, material_id: Option<MaterialId>) {
        let tag = AllocationTag::order(order.id);
        match self
            .allocator
            .clear_allocation_by_tag(order.vendor_id, material_id, &tag)
        {
            Ok(released) => info!(%tag, released, "allocations released"),
            Err(e) => warn!(%tag, error = %e, "unable to release allocations"),
        }
    }

    fn post_message(&self, order: &Order, text: Option<&str>, actor: &UserId) -> DomainResult<Option<String>> {
        match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => Ok(Some(self.services.conversations.add_message(
                ORDER_OBJECT,
                &order.id.to_string(),
                text,
                actor,
            )?)),
            None => Ok(None),
        }
    }

    fn record_activity(
        &self,
        order: &Order,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        actor: &UserId,
    ) {
        self.services.activity.record(Activity {
            object_type: ORDER_OBJECT.to_string(),
            object_id: order.id.to_string(),
            field: field.to_string(),
            old_value,
            new_value,
            actor: actor.clone(),
            at: Utc::now(),
        });
    }

    /// Fire-and-forget: failures are logged, never surfaced.
    fn publish(&self, order: &Order, events: PendingEvents) {
        for (kind, notify) in events.0 {
            let event = OrderEvent::new(order.id, order.domain_id, kind, order.status, Utc::now());
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                order.domain_id,
                ORDER_OBJECT,
                order.id.to_string(),
                event,
            )
            .with_notify(notify);

            if let Err(e) = self.services.notifier.notify(envelope) {
                error!(order_id = %order.id, ?kind, error = %e, "failed to publish order event");
            }
        }
    }
}

fn unavailable(material_id: MaterialId, entity_id: EntityId) -> DomainError {
    DomainError::validation_with_args(
        codes::MATERIAL_UNAVAILABLE,
        format!("material {material_id} is not stocked at entity {entity_id}"),
        [material_id.to_string(), entity_id.to_string()],
    )
}

/// Fulfilled and cancelled orders keep their lines as they were closed.
fn not_editable(order: &Order) -> DomainError {
    DomainError::validation_with_args(
        codes::ILLEGAL_TRANSITION,
        format!("order {} is {} and can no longer be edited", order.id, order.status),
        [order.id.to_string(), order.status.code().to_string()],
    )
}

/// Item status after a successful reservation on a confirmed order.
pub(crate) fn confirmed_item_status(allocated: bool) -> ItemStatus {
    if allocated {
        ItemStatus::Confirmed
    } else {
        ItemStatus::Pending
    }
}
