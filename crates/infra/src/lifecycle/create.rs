use chrono::Utc;
use tracing::{info, instrument, warn};

use orderflow_core::{DomainError, DomainResult, ExpectedVersion, codes};
use orderflow_events::NotifyOptions;
use orderflow_inventory::{AllocationTag, InventoryAllocator};
use orderflow_orders::{Order, OrderEventKind, OrderStatus, OrderType, StatusHistoryEntry};

use super::{
    CreateOrderRequest, OrderLifecycleManager, PendingEvents, confirmed_item_status,
};
use crate::collaborators::{DeferredTask, TagKind};
use crate::lock::LockManager;
use crate::repository::{OrderRepository, OrderUnit};

impl<R, L, A> OrderLifecycleManager<R, L, A>
where
    R: OrderRepository,
    L: LockManager,
    A: InventoryAllocator,
{
    /// Create and persist a new order with its demand items.
    ///
    /// Sales orders start `Confirmed` when requested and the domain allows it;
    /// with automatic goods issue, each line's original quantity is then
    /// reserved against the vendor. Should the commit fail, those reservations
    /// are released again.
    #[instrument(
        skip_all,
        fields(domain_id = %request.domain_id, customer_id = %request.customer_id, order_type = ?request.order_type)
    )]
    pub fn create_order(&self, request: CreateOrderRequest) -> DomainResult<Order> {
        if request.lines.is_empty() && !request.allow_empty {
            return Err(DomainError::validation(
                codes::EMPTY_ORDER,
                "an order needs at least one item",
            ));
        }
        if let Some(line) = request.lines.iter().find(|l| l.quantity < 0) {
            return Err(DomainError::validation_with_args(
                codes::NEGATIVE_QUANTITY,
                format!("quantity for material {} is negative", line.material_id),
                [line.material_id.to_string(), line.quantity.to_string()],
            ));
        }

        let cfg = self.orders_config(request.domain_id);
        let customer = self
            .services
            .entities
            .entity(request.customer_id)
            .ok_or_else(|| DomainError::not_found(format!("entity {}", request.customer_id)))?;
        let vendor_id = request.vendor_id.or(customer.default_vendor);
        let actor = &request.actor;
        let now = Utc::now();

        let mut order = Order::new(
            self.repo.next_order_id()?,
            request.domain_id,
            customer.id,
            vendor_id,
            request.order_type,
            actor.clone(),
            now,
        );
        order.tax_bps = customer.tax_bps;
        order.currency = customer.currency.clone();
        order.entity_tags = customer.tags.clone();
        order.order_tags = self
            .services
            .tags
            .resolve(TagKind::Order, &request.tags)
            .into_iter()
            .map(|t| t.name)
            .collect();
        order.set_reference_id(request.reference_id.clone());
        order.visible_to_customer = request.visible_to_customer;
        order.visible_to_vendor = request.visible_to_vendor
            && !(request.order_type == OrderType::Transfer && cfg.hide_transfers_from_vendor);
        if let Some(payment) = &request.payment {
            order.add_payment(payment)?;
        }

        for line in &request.lines {
            if request.validate_handling_units {
                self.validate_handling_unit(line.material_id, line.quantity)?;
            }
            let mut item = self.build_item(&order, line.material_id, line.quantity, actor, now)?;
            item.reason.clone_from(&line.reason);
            order.ledger().add(item);
        }
        order.compute_total_price()?;

        let start_confirmed = request.confirm
            && request.order_type == OrderType::Sales
            && cfg.allow_sales_order_as_confirmed;
        let allocation_attempted = start_confirmed && cfg.auto_goods_issue;
        if start_confirmed {
            order.apply_status(OrderStatus::Confirmed, actor, now);
            if allocation_attempted {
                // Partial reservations stay in place even when reported as failures.
                let allocated = self.allocate_items(&order, &cfg, actor, true);
                for item in order.items.iter_mut().filter(|i| !i.is_cancelled()) {
                    item.status = confirmed_item_status(allocated.contains(&item.material_id));
                }
            }
        }

        let message_id = self.post_message(&order, request.message.as_deref(), actor)?;
        let entry = StatusHistoryEntry::new(order.id, None, order.status, actor.clone(), now)
            .with_message(message_id.clone());

        let order_id = order.id;
        let vendor = order.vendor_id;
        let stored = match self
            .repo
            .commit(OrderUnit::new(order).with_history(entry), ExpectedVersion::New)
        {
            Ok(stored) => stored,
            Err(e) => {
                if allocation_attempted {
                    warn!(%order_id, "commit failed; releasing allocations made for the order");
                    if let Err(release) = self.allocator.clear_allocation_by_tag(
                        vendor,
                        None,
                        &AllocationTag::order(order_id),
                    ) {
                        warn!(%order_id, error = %release, "unable to release allocations");
                    }
                }
                return Err(e.into());
            }
        };
        info!(order_id = %stored.id, status = %stored.status, items = stored.items.len(), "order created");

        let mut events = PendingEvents::default();
        if stored.is_visible_to_both() {
            events.push(OrderEventKind::Created, NotifyOptions::default());
        }
        if request.payment.as_ref().is_some_and(|p| p.amount > 0) {
            events.push(OrderEventKind::Paid, NotifyOptions::default());
        }
        if message_id.is_some() {
            events.push(
                OrderEventKind::Commented,
                NotifyOptions {
                    message: request.message.clone(),
                    user_ids: Vec::new(),
                },
            );
        }
        self.publish(&stored, events);

        let entity_ids = std::iter::once(stored.customer_id)
            .chain(stored.vendor_id)
            .collect();
        self.services
            .tasks
            .schedule(DeferredTask::RefreshEntityActivity { entity_ids });

        Ok(stored)
    }
}
