use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use orderflow_core::{DomainResult, ExpectedVersion, UserId};
use orderflow_events::NotifyOptions;
use orderflow_inventory::InventoryAllocator;
use orderflow_orders::{Order, OrderEventKind, OrderStatus, StatusHistoryEntry};

use super::{
    OrderLifecycleManager, PendingEvents, UpdateOrderOptions, UpdateStatusRequest, UpdatedOrder,
    not_editable,
};
use crate::collaborators::ShipmentStatus;
use crate::lock::{LockGuard, LockKey, LockManager};
use crate::repository::{OrderRepository, OrderUnit};

impl<R, L, A> OrderLifecycleManager<R, L, A>
where
    R: OrderRepository,
    L: LockManager,
    A: InventoryAllocator,
{
    /// Move an order to `new_status`.
    ///
    /// Returns an unchanged result when the order already has that status.
    #[instrument(skip_all, fields(order_id = %request.order_id, status = %request.new_status))]
    pub fn update_order_status(&self, request: UpdateStatusRequest) -> DomainResult<UpdatedOrder> {
        let guard = LockGuard::acquire(&self.locks, LockKey::order(request.order_id))?;

        let mut order = self.load(request.order_id)?;
        let old_status = order.status;
        let new_status = request.new_status;
        if old_status == new_status {
            debug!("order already has the requested status");
            return Ok(UpdatedOrder::unchanged(order));
        }
        old_status.validate_transition(new_status)?;

        let cfg = self.orders_config(order.domain_id);
        let actor = &request.actor;
        let now = Utc::now();
        let expected = ExpectedVersion::Exact(order.version);

        if new_status == OrderStatus::Cancelled {
            order.cancelled_discrepancy_reason.clone_from(&request.reason);
        }
        order.apply_status(new_status, actor, now);
        if new_status == OrderStatus::Confirmed
            && cfg.auto_goods_issue
            && cfg.allocate_stock_on_confirmation
        {
            self.allocate_items(&order, &cfg, actor, false);
        }

        let message_id = self.post_message(&order, request.message.as_deref(), actor)?;
        let entry = StatusHistoryEntry::new(order.id, Some(old_status), new_status, actor.clone(), now)
            .with_message(message_id.clone());
        let stored = self
            .repo
            .commit(OrderUnit::new(order).with_history(entry), expected)?;
        info!(from = %old_status, to = %new_status, "order status changed");

        if new_status == OrderStatus::Cancelled {
            self.cancel_shipments(&stored, actor, request.reason.as_deref());
            if cfg.auto_goods_issue {
                self.release_allocations(&stored, None);
            }
        }
        drop(guard);

        self.record_activity(
            &stored,
            "status",
            Some(old_status.code().to_string()),
            Some(new_status.code().to_string()),
            actor,
        );
        let mut events = PendingEvents::default();
        events.push(
            OrderEventKind::StatusChange,
            NotifyOptions {
                message: request.message.clone(),
                user_ids: request.notify_user_ids.clone(),
            },
        );
        self.publish(&stored, events);

        Ok(UpdatedOrder {
            order: stored,
            changed: true,
            message_id,
        })
    }

    /// Persist an edited copy of an order.
    ///
    /// A backordered order whose lines have all shipped moves on to the status
    /// its shipments imply. The copy must be at the stored version.
    #[instrument(skip_all, fields(order_id = %order.id))]
    pub fn update_order(&self, order: Order, options: UpdateOrderOptions) -> DomainResult<UpdatedOrder> {
        let guard = LockGuard::acquire(&self.locks, LockKey::order(order.id))?;
        let (updated, events) = self.commit_update(order, &options)?;
        drop(guard);

        self.publish(&updated.order, events);
        Ok(updated)
    }

    /// Commit half of `update_order`; the caller holds the order lock.
    pub(super) fn commit_update(
        &self,
        mut order: Order,
        options: &UpdateOrderOptions,
    ) -> DomainResult<(UpdatedOrder, PendingEvents)> {
        let persisted = self.load(order.id)?;
        if persisted.status.is_terminal() && order.items != persisted.items {
            return Err(not_editable(&persisted));
        }
        let actor = &options.actor;
        let now = Utc::now();

        if options.validate_handling_units {
            for item in order.items.iter().filter(|i| !i.is_cancelled()) {
                self.validate_handling_unit(item.material_id, item.quantity)?;
            }
        }

        let mut history = Vec::new();
        if order.status != persisted.status {
            persisted.status.validate_transition(order.status)?;
            let status = order.status;
            order.apply_status(status, actor, now);
            history.push(self.history_entry(&order, persisted.status, status, actor));
        }
        if let Some(next) = self.shipment_driven_status(&order)? {
            let from = order.status;
            order.apply_status(next, actor, now);
            history.push(self.history_entry(&order, from, next, actor));
            info!(from = %from, to = %next, "backorder fully shipped");
        }

        order.compute_total_price()?;
        order.touch(actor, now);

        let status_changed = order.status != persisted.status;
        let paid_changed = order.paid != persisted.paid;
        let expected = ExpectedVersion::Exact(order.version);
        let stored = self.repo.commit(OrderUnit { order, history }, expected)?;

        let mut events = PendingEvents::default();
        if paid_changed {
            events.push(OrderEventKind::Paid, NotifyOptions::default());
        }
        if status_changed {
            events.push(OrderEventKind::StatusChange, options.notify.clone());
        }
        if !paid_changed && !status_changed {
            events.push(OrderEventKind::Modified, options.notify.clone());
        }

        Ok((
            UpdatedOrder {
                order: stored,
                changed: true,
                message_id: None,
            },
            events,
        ))
    }

    fn shipment_driven_status(&self, order: &Order) -> DomainResult<Option<OrderStatus>> {
        let has_live_items = order.items.iter().any(|i| !i.is_cancelled());
        if order.status != OrderStatus::Backordered || !has_live_items || !order.is_fully_shipped() {
            return Ok(None);
        }
        let shipments = self.services.shipments.shipments_by_order(order.id)?;
        let next = self.services.shipments.overall_status(&shipments, order);
        Ok(order.status.can_transition_to(next).then_some(next))
    }

    fn history_entry(
        &self,
        order: &Order,
        from: OrderStatus,
        to: OrderStatus,
        actor: &UserId,
    ) -> StatusHistoryEntry {
        StatusHistoryEntry::new(order.id, Some(from), to, actor.clone(), Utc::now())
    }

    fn cancel_shipments(&self, order: &Order, actor: &UserId, reason: Option<&str>) {
        let shipments = match self.services.shipments.shipments_by_order(order.id) {
            Ok(s) => s,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "unable to load shipments for cancellation");
                return;
            }
        };
        for shipment in shipments
            .iter()
            .filter(|s| !matches!(s.status, ShipmentStatus::Cancelled | ShipmentStatus::Fulfilled))
        {
            if let Err(e) = self.services.shipments.update_shipment_status(
                &shipment.id,
                ShipmentStatus::Cancelled,
                actor,
                reason,
            ) {
                warn!(order_id = %order.id, shipment_id = %shipment.id, error = %e, "unable to cancel shipment");
            }
        }
    }
}
