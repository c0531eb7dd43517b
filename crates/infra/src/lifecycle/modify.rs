use chrono::Utc;
use tracing::{debug, instrument, warn};

use orderflow_core::{DomainError, DomainResult, ExpectedVersion, OrderId, UserId, codes};
use orderflow_events::NotifyOptions;
use orderflow_inventory::InventoryAllocator;
use orderflow_orders::{EditOutcome, Order, OrderEventKind};

use super::{
    ModifyOrderRequest, OrderLifecycleManager, PendingEvents, UpdateOrderOptions, UpdatedOrder,
    ORDER_OBJECT, not_editable,
};
use crate::collaborators::TagKind;
use crate::lock::{LockGuard, LockKey, LockManager};
use crate::repository::{OrderRepository, OrderUnit};

impl<R, L, A> OrderLifecycleManager<R, L, A>
where
    R: OrderRepository,
    L: LockManager,
    A: InventoryAllocator,
{
    /// Apply demand edits and order metadata changes to `order` in place.
    ///
    /// Nothing is persisted; follow with [`Self::update_order`] (or use
    /// [`Self::reorder`]). On error `order` is left untouched.
    #[instrument(skip_all, fields(order_id = %order.id, edits = request.edits.len()))]
    pub fn modify_order(
        &self,
        order: &mut Order,
        request: &ModifyOrderRequest,
        actor: &UserId,
    ) -> DomainResult<()> {
        if order.status.is_terminal() {
            return Err(not_editable(order));
        }

        let cfg = self.orders_config(order.domain_id);
        let now = Utc::now();
        let mut working = order.clone();
        let mut dropped = Vec::new();

        for edit in &request.edits {
            let Some(material_id) = edit.material_id else {
                warn!("edit without material; skipping");
                continue;
            };
            if edit.quantity < 0 {
                warn!(%material_id, quantity = edit.quantity, "negative quantity; skipping edit");
                continue;
            }
            if request.validate_handling_units && edit.quantity > 0 {
                self.validate_handling_unit(material_id, edit.quantity)?;
            }

            match working.ledger().apply_edit(edit, actor, now) {
                EditOutcome::Updated | EditOutcome::Skipped => {}
                EditOutcome::Cancelled => dropped.push(material_id),
                EditOutcome::Missing if edit.quantity == 0 => {
                    debug!(%material_id, "zero quantity for a material not on the order");
                }
                EditOutcome::Missing => {
                    let mut item = self.build_item(&working, material_id, edit.quantity, actor, now)?;
                    item.reason.clone_from(&edit.reason);
                    item.message.clone_from(&edit.message);
                    item.ordering_discrepancy_reason
                        .clone_from(&edit.ordering_discrepancy_reason);
                    working.ledger().add(item);
                }
            }
        }

        if working.all_items_zero() && !request.allow_empty {
            return Err(DomainError::validation(
                codes::EMPTY_ORDER,
                format!("order {} would be left without any item", working.id),
            ));
        }

        if let Some(names) = &request.order_tags {
            working.order_tags = self
                .services
                .tags
                .resolve(TagKind::Order, names)
                .into_iter()
                .map(|t| t.name)
                .collect();
        }
        if let Some(payment) = &request.payment {
            working.add_payment(payment)?;
        }
        if request.reference_id.is_some() {
            working.set_reference_id(request.reference_id.clone());
        }
        working.compute_total_price()?;
        if let Some(text) = request.message.as_deref().filter(|t| !t.trim().is_empty()) {
            self.services
                .conversations
                .add_message(ORDER_OBJECT, &working.id.to_string(), text, actor)?;
        }

        working.touch(actor, now);
        *order = working;

        if cfg.auto_goods_issue {
            for material_id in dropped {
                self.release_allocations(order, Some(material_id));
            }
        }
        Ok(())
    }

    /// Load, edit and persist an order under one lock.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub fn reorder(
        &self,
        order_id: OrderId,
        request: ModifyOrderRequest,
        actor: &UserId,
    ) -> DomainResult<UpdatedOrder> {
        let guard = LockGuard::acquire(&self.locks, LockKey::order(order_id))?;

        let mut order = self.load(order_id)?;
        self.modify_order(&mut order, &request, actor)?;
        let (updated, events) = self.commit_update(order, &UpdateOrderOptions::new(actor.clone()))?;
        drop(guard);

        self.publish(&updated.order, events);
        Ok(updated)
    }

    /// Replace the external reference stored in the slot for the order type.
    #[instrument(skip_all, fields(order_id = %order_id))]
    pub fn update_order_reference_id(
        &self,
        order_id: OrderId,
        reference_id: Option<String>,
        actor: &UserId,
    ) -> DomainResult<UpdatedOrder> {
        let guard = LockGuard::acquire(&self.locks, LockKey::order(order_id))?;

        let mut order = self.load(order_id)?;
        let old = order.reference_id().map(str::to_string);
        if old == reference_id {
            debug!("reference id unchanged");
            return Ok(UpdatedOrder::unchanged(order));
        }
        let expected = ExpectedVersion::Exact(order.version);
        order.set_reference_id(reference_id.clone());
        order.touch(actor, Utc::now());
        let stored = self.repo.commit(OrderUnit::new(order), expected)?;
        drop(guard);

        self.record_activity(&stored, "reference_id", old, reference_id, actor);
        let mut events = PendingEvents::default();
        events.push(OrderEventKind::Modified, NotifyOptions::default());
        self.publish(&stored, events);

        Ok(UpdatedOrder {
            order: stored,
            changed: true,
            message_id: None,
        })
    }
}
