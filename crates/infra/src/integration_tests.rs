//! End-to-end order lifecycle scenarios.
//!
//! Tests: request → lock → repository → allocator → event bus
//!
//! Verifies:
//! - Status changes follow the transition table and leave history behind
//! - Reservations follow confirmation, cancellation and edits
//! - Concurrent mutations of one order are serialized by the order lock
//! - Events are published only after a successful commit

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use orderflow_core::{
        DomainError, DomainId, EntityId, ExpectedVersion, MaterialId, OrderId, ShipmentId, UserId,
        codes,
    };
    use orderflow_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
    use orderflow_inventory::{
        AllocationTag, InMemoryAllocationStore, InMemoryStockSource, InventoryAllocationCoordinator,
        InventoryAllocator, InventorySnapshot, OperationType, StockBatch,
    };
    use orderflow_orders::{
        DemandEdit, DemandItem, DiscrepancyKind, ItemStatus, Order, OrderEvent, OrderEventKind,
        OrderStatus, OrderType, PaymentRecord, RecommendedQuantity, StatusHistoryEntry,
    };

    use crate::collaborators::{
        BusEventNotifier, Collaborators, DeferredTask, Entity, HandlingUnit, InMemoryCatalog,
        InMemoryConversations, InMemoryHandlingUnits, InMemoryInventoryService,
        InMemoryShipmentService, InMemoryTagService, Material, RecordingActivity,
        RecordingTaskScheduler, Shipment, ShipmentService, ShipmentStatus,
    };
    use crate::config::{OrdersConfig, StaticDomainConfig};
    use crate::lifecycle::{
        CreateOrderRequest, ModifyOrderRequest, OrderLifecycleManager, ShipNowRequest,
        UpdateOrderOptions, UpdateStatusRequest,
    };
    use crate::lock::{InMemoryLockManager, LockKey, LockManager};
    use crate::queries::{ClearAllocationsRequest, DiscrepancyCriteria, OrderQueries};
    use crate::repository::{
        DemandFilter, InMemoryOrderRepository, OrderFilter, OrderRepository, OrderUnit, Page,
        PageParams, RepositoryError,
    };

    type Allocator = InventoryAllocationCoordinator<Arc<InMemoryAllocationStore>, Arc<InMemoryStockSource>>;
    type Manager<R> = OrderLifecycleManager<R, Arc<InMemoryLockManager>, Arc<Allocator>>;

    const DOMAIN: DomainId = DomainId::new(1);
    const CUSTOMER: EntityId = EntityId::new(10);
    const VENDOR: EntityId = EntityId::new(20);
    const BANDAGES: MaterialId = MaterialId::new(1);
    const SYRINGES: MaterialId = MaterialId::new(2);

    fn actor() -> UserId {
        UserId::new("alice")
    }

    struct Harness {
        catalog: Arc<InMemoryCatalog>,
        inventory: Arc<InMemoryInventoryService>,
        handling_units: Arc<InMemoryHandlingUnits>,
        shipments: Arc<InMemoryShipmentService>,
        conversations: Arc<InMemoryConversations>,
        activity: Arc<RecordingActivity>,
        tasks: Arc<RecordingTaskScheduler>,
        bus: Arc<InMemoryEventBus<EventEnvelope<OrderEvent>>>,
        stock: Arc<InMemoryStockSource>,
        allocator: Arc<Allocator>,
        locks: Arc<InMemoryLockManager>,
    }

    impl Harness {
        fn new() -> Self {
            let catalog = Arc::new(InMemoryCatalog::new());
            catalog.add_material(Material {
                id: BANDAGES,
                name: "Bandages".to_string(),
                retail_price: 250,
                tags: vec!["consumable".to_string()],
            });
            catalog.add_material(Material {
                id: SYRINGES,
                name: "Syringes".to_string(),
                retail_price: 100,
                tags: Vec::new(),
            });
            catalog.add_entity(Entity {
                id: CUSTOMER,
                name: "District Clinic".to_string(),
                default_vendor: Some(VENDOR),
                tax_bps: 0,
                currency: Some("USD".to_string()),
                tags: vec!["clinic".to_string()],
            });
            catalog.add_entity(Entity {
                id: VENDOR,
                name: "Central Store".to_string(),
                default_vendor: None,
                tax_bps: 0,
                currency: Some("USD".to_string()),
                tags: Vec::new(),
            });

            let inventory = Arc::new(InMemoryInventoryService::new());
            let mut bandages = InventorySnapshot::new(CUSTOMER, BANDAGES);
            bandages.stock = 20;
            bandages.max_stock = 50;
            inventory.put(bandages);
            inventory.put(InventorySnapshot::new(CUSTOMER, SYRINGES));

            let stock = Arc::new(InMemoryStockSource::new());
            stock.set_stock(VENDOR, BANDAGES, vec![StockBatch::unbatched(100)]);
            stock.set_stock(VENDOR, SYRINGES, vec![StockBatch::unbatched(100)]);
            let allocator = Arc::new(InventoryAllocationCoordinator::new(
                Arc::new(InMemoryAllocationStore::new()),
                stock.clone(),
            ));

            Self {
                catalog,
                inventory,
                handling_units: Arc::new(InMemoryHandlingUnits::new()),
                shipments: Arc::new(InMemoryShipmentService::new()),
                conversations: Arc::new(InMemoryConversations::new()),
                activity: Arc::new(RecordingActivity::new()),
                tasks: Arc::new(RecordingTaskScheduler::new()),
                bus: Arc::new(InMemoryEventBus::new()),
                stock,
                allocator,
                locks: Arc::new(InMemoryLockManager::new()),
            }
        }

        fn collaborators(&self) -> Collaborators {
            Collaborators {
                materials: self.catalog.clone(),
                entities: self.catalog.clone(),
                inventory: self.inventory.clone(),
                handling_units: self.handling_units.clone(),
                shipments: self.shipments.clone(),
                tags: Arc::new(InMemoryTagService::new()),
                activity: self.activity.clone(),
                conversations: self.conversations.clone(),
                notifier: Arc::new(BusEventNotifier::new(self.bus.clone())),
                tasks: self.tasks.clone(),
            }
        }

        fn manager<R: OrderRepository>(&self, repo: R, cfg: OrdersConfig) -> Manager<R> {
            OrderLifecycleManager::new(
                repo,
                self.locks.clone(),
                self.allocator.clone(),
                Arc::new(StaticDomainConfig::new(cfg)),
                self.collaborators(),
            )
        }

        fn queries(&self, repo: Arc<InMemoryOrderRepository>) -> OrderQueries<Arc<InMemoryOrderRepository>, Arc<Allocator>> {
            OrderQueries::new(repo, self.allocator.clone(), self.catalog.clone(), self.catalog.clone())
        }

        fn reserved(&self, order_id: OrderId, material_id: MaterialId) -> i64 {
            self.allocator
                .allocated_quantity(VENDOR, material_id, OperationType::Order, &order_id.to_string())
                .unwrap()
        }
    }

    fn setup(cfg: OrdersConfig) -> (Harness, Arc<InMemoryOrderRepository>, Manager<Arc<InMemoryOrderRepository>>) {
        let harness = Harness::new();
        let repo = Arc::new(InMemoryOrderRepository::new());
        let manager = harness.manager(repo.clone(), cfg);
        (harness, repo, manager)
    }

    fn goods_issue() -> OrdersConfig {
        OrdersConfig::default()
            .with_auto_goods_issue(true)
            .with_allocate_stock_on_confirmation(true)
            .with_allow_sales_order_as_confirmed(true)
    }

    fn sales_order() -> CreateOrderRequest {
        CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Sales, actor())
            .with_line(BANDAGES, 10)
            .with_line(SYRINGES, 4)
    }

    fn kinds(sub: &Subscription<EventEnvelope<OrderEvent>>) -> Vec<OrderEventKind> {
        sub.drain().iter().map(|e| e.payload().kind).collect()
    }

    fn set_status(
        manager: &Manager<Arc<InMemoryOrderRepository>>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Order {
        manager
            .update_order_status(UpdateStatusRequest::new(order_id, status, actor()))
            .unwrap()
            .order
    }

    #[test]
    fn create_order_prices_lines_and_announces_it() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let events = h.bus.subscribe();

        let order = manager
            .create_order(
                sales_order()
                    .with_payment(PaymentRecord {
                        amount: 500,
                        option: Some("cash".to_string()),
                    })
                    .with_message("please deliver before friday"),
            )
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.vendor_id, Some(VENDOR));
        assert_eq!(order.version, 1);
        assert_eq!(order.total_price, 10 * 250 + 4 * 100);
        assert_eq!(order.paid, 500);
        assert_eq!(order.entity_tags, vec!["clinic".to_string()]);

        let bandages = order.item(BANDAGES).unwrap();
        assert_eq!(bandages.original_quantity, 10);
        assert_eq!(bandages.recommended, RecommendedQuantity::Quantity(30));
        assert_eq!(bandages.tags, vec!["consumable".to_string()]);
        assert_eq!(
            order.item(SYRINGES).unwrap().recommended,
            RecommendedQuantity::NotApplicable
        );

        assert_eq!(
            kinds(&events),
            vec![OrderEventKind::Created, OrderEventKind::Paid, OrderEventKind::Commented]
        );
        assert_eq!(
            h.conversations.thread("order", &order.id.to_string()),
            vec!["please deliver before friday".to_string()]
        );

        let history = repo.status_history(order.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, None);
        assert_eq!(history[0].new_status, OrderStatus::Pending);
        assert_eq!(history[0].message_id.as_deref(), Some("msg-1"));

        assert_eq!(
            h.tasks.tasks(),
            vec![DeferredTask::RefreshEntityActivity {
                entity_ids: vec![CUSTOMER, VENDOR]
            }]
        );
    }

    #[test]
    fn empty_order_is_rejected_unless_allowed() {
        let (_h, repo, manager) = setup(OrdersConfig::default());

        let err = manager
            .create_order(CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Sales, actor()))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY_ORDER));
        assert!(repo.is_empty());

        let order = manager
            .create_order(CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Sales, actor()).allowing_empty())
            .unwrap();
        assert!(order.items.is_empty());
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let err = manager.create_order(sales_order().with_line(BANDAGES, -1)).unwrap_err();
        assert_eq!(err.code(), Some(codes::NEGATIVE_QUANTITY));
    }

    #[test]
    fn material_without_inventory_is_unavailable() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let err = manager
            .create_order(sales_order().with_vendor(VENDOR).with_line(MaterialId::new(99), 1))
            .unwrap_err();
        // Unknown to the catalog entirely.
        assert!(matches!(err, DomainError::NotFound(_)));

        let h = Harness::new();
        h.catalog.add_material(Material {
            id: MaterialId::new(3),
            name: "Gloves".to_string(),
            retail_price: 10,
            tags: Vec::new(),
        });
        let manager = h.manager(Arc::new(InMemoryOrderRepository::new()), OrdersConfig::default());
        let err = manager
            .create_order(sales_order().with_line(MaterialId::new(3), 1))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::MATERIAL_UNAVAILABLE));
    }

    #[test]
    fn handling_unit_mismatch_is_rejected_with_arguments() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        h.handling_units.set(
            SYRINGES,
            HandlingUnit {
                name: "box".to_string(),
                quantity: 6,
            },
        );

        let err = manager
            .create_order(sales_order().validating_handling_units())
            .unwrap_err();
        match err {
            DomainError::Validation { code, args, .. } => {
                assert_eq!(code, codes::HANDLING_UNIT_MISMATCH);
                assert_eq!(args, vec!["2", "4", "box", "6"]);
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
        assert!(repo.is_empty());

        // Without the check the same request goes through.
        assert!(manager.create_order(sales_order()).is_ok());
    }

    #[test]
    fn confirmed_sales_order_reserves_stock_and_marks_shortfalls_pending() {
        let (h, _repo, manager) = setup(goods_issue());
        h.stock.set_stock(VENDOR, SYRINGES, vec![StockBatch::unbatched(3)]);

        let order = manager.create_order(sales_order().confirmed()).unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.item(BANDAGES).unwrap().status, ItemStatus::Confirmed);
        assert_eq!(order.item(SYRINGES).unwrap().status, ItemStatus::Pending);
        assert_eq!(h.reserved(order.id, BANDAGES), 10);
        // The partial reservation stays in place.
        assert_eq!(h.reserved(order.id, SYRINGES), 3);
    }

    #[test]
    fn confirmation_is_ignored_for_non_sales_orders() {
        let (h, _repo, manager) = setup(goods_issue());
        let order = manager
            .create_order(
                CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Purchase, actor())
                    .with_line(BANDAGES, 5)
                    .confirmed(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(h.reserved(order.id, BANDAGES), 0);
    }

    #[test]
    fn confirming_allocates_and_cancelling_releases() {
        let (h, repo, manager) = setup(goods_issue());
        let events = h.bus.subscribe();
        let order = manager.create_order(sales_order()).unwrap();
        events.drain();

        let confirmed = set_status(&manager, order.id, OrderStatus::Confirmed);
        assert_eq!(confirmed.item(SYRINGES).unwrap().status, ItemStatus::Confirmed);
        assert_eq!(h.reserved(order.id, BANDAGES), 10);
        assert_eq!(h.reserved(order.id, SYRINGES), 4);

        let cancelled = manager
            .update_order_status(
                UpdateStatusRequest::new(order.id, OrderStatus::Cancelled, actor())
                    .with_reason("duplicate order")
                    .with_message("cancelling, see order 7"),
            )
            .unwrap();
        assert!(cancelled.changed);
        assert_eq!(cancelled.message_id.as_deref(), Some("msg-1"));
        assert_eq!(cancelled.order.cancelled_discrepancy_reason.as_deref(), Some("duplicate order"));
        assert!(cancelled.order.items.iter().all(|i| i.status == ItemStatus::Cancelled));

        let tag = AllocationTag::order(order.id);
        assert_eq!(h.allocator.clear_allocation_by_tag(None, None, &tag).unwrap(), 0);
        assert_eq!(
            kinds(&events),
            vec![OrderEventKind::StatusChange, OrderEventKind::StatusChange]
        );

        let statuses: Vec<OrderStatus> = repo
            .status_history(order.id)
            .unwrap()
            .iter()
            .map(|e| e.new_status)
            .collect();
        assert_eq!(
            statuses,
            vec![OrderStatus::Pending, OrderStatus::Confirmed, OrderStatus::Cancelled]
        );
        assert!(h
            .activity
            .entries()
            .iter()
            .any(|a| a.field == "status" && a.new_value.as_deref() == Some("cn")));
    }

    #[test]
    fn confirmation_reserves_nothing_without_goods_issue() {
        let (h, _repo, manager) = setup(OrdersConfig::default().with_allocate_stock_on_confirmation(true));
        let order = manager.create_order(sales_order()).unwrap();

        let confirmed = set_status(&manager, order.id, OrderStatus::Confirmed);
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(h.reserved(order.id, BANDAGES), 0);
        assert_eq!(h.reserved(order.id, SYRINGES), 0);

        set_status(&manager, order.id, OrderStatus::Cancelled);
        let tag = AllocationTag::order(order.id);
        assert_eq!(h.allocator.clear_allocation_by_tag(None, None, &tag).unwrap(), 0);
    }

    #[test]
    fn confirming_with_short_stock_still_confirms() {
        let (h, _repo, manager) = setup(goods_issue());
        h.stock.set_stock(VENDOR, BANDAGES, vec![StockBatch::unbatched(6)]);
        let order = manager.create_order(sales_order()).unwrap();

        let confirmed = set_status(&manager, order.id, OrderStatus::Confirmed);

        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(h.reserved(order.id, BANDAGES), 6);
        assert_eq!(h.reserved(order.id, SYRINGES), 4);
    }

    #[test]
    fn cancelling_cancels_open_shipments() {
        let (h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let shipment_id = manager
            .ship_now(ShipNowRequest {
                order_id: order.id,
                carrier: Some("DHL".to_string()),
                tracking_id: None,
                items: Vec::new(),
                actor: actor(),
            })
            .unwrap();

        set_status(&manager, order.id, OrderStatus::Cancelled);

        let shipments = h.shipments.shipments_by_order(order.id).unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].id, shipment_id);
        assert_eq!(shipments[0].status, ShipmentStatus::Cancelled);
        assert_eq!(shipments[0].items, vec![(BANDAGES, 10), (SYRINGES, 4)]);
    }

    #[test]
    fn same_status_is_a_no_op() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let events = h.bus.subscribe();

        let result = manager
            .update_order_status(UpdateStatusRequest::new(order.id, OrderStatus::Pending, actor()))
            .unwrap();

        assert!(!result.changed);
        assert_eq!(result.order.version, order.version);
        assert!(events.drain().is_empty());
        assert_eq!(repo.status_history(order.id).unwrap().len(), 1);
    }

    #[test]
    fn illegal_transition_carries_both_codes() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        set_status(&manager, order.id, OrderStatus::Cancelled);

        let err = manager
            .update_order_status(UpdateStatusRequest::new(order.id, OrderStatus::Confirmed, actor()))
            .unwrap_err();
        match err {
            DomainError::Validation { code, args, .. } => {
                assert_eq!(code, codes::ILLEGAL_TRANSITION);
                assert_eq!(args, vec!["cn", "cf"]);
            }
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_order_is_not_found() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let err = manager
            .update_order_status(UpdateStatusRequest::new(OrderId::new(404), OrderStatus::Confirmed, actor()))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn held_lock_makes_other_threads_back_off() {
        let (h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let key = LockKey::order(order.id);
        h.locks.acquire(&key).unwrap();

        let err = thread::scope(|s| {
            s.spawn(|| {
                manager
                    .update_order_status(UpdateStatusRequest::new(order.id, OrderStatus::Confirmed, actor()))
                    .unwrap_err()
            })
            .join()
            .unwrap()
        });
        assert!(matches!(err, DomainError::LockContention(_)));
        assert_eq!(err.code(), Some(codes::ORDER_BUSY));
        assert!(err.is_retryable());

        assert!(h.locks.release(&key).unwrap());
        assert!(!h.locks.is_held(&key));
        assert_eq!(set_status(&manager, order.id, OrderStatus::Confirmed).status, OrderStatus::Confirmed);
    }

    #[test]
    fn concurrent_status_updates_apply_once() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let barrier = Barrier::new(2);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        manager.update_order_status(UpdateStatusRequest::new(
                            order.id,
                            OrderStatus::Confirmed,
                            actor(),
                        ))
                    })
                })
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        let applied = results
            .iter()
            .filter(|r| matches!(r, Ok(u) if u.changed))
            .count();
        assert_eq!(applied, 1);
        for result in &results {
            match result {
                Ok(_) => {}
                Err(DomainError::LockContention(_)) => {}
                Err(other) => panic!("Expected success or contention, got {other:?}"),
            }
        }

        let stored = repo.get_order(order.id).unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(stored.version, 2);
        assert_eq!(repo.status_history(order.id).unwrap().len(), 2);
        assert!(!h.locks.is_held(&LockKey::order(order.id)));
    }

    #[test]
    fn stale_copy_is_a_conflict() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let stale = order.clone();
        set_status(&manager, order.id, OrderStatus::Confirmed);

        let err = manager
            .update_order(stale, UpdateOrderOptions::new(actor()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn editing_every_line_to_zero_needs_allow_empty() {
        let (h, repo, manager) = setup(goods_issue());
        let order = manager.create_order(sales_order().confirmed()).unwrap();
        let edits = vec![DemandEdit::new(BANDAGES, 0), DemandEdit::new(SYRINGES, 0)];

        let mut copy = repo.get_order(order.id).unwrap().unwrap();
        let err = manager
            .modify_order(&mut copy, &ModifyOrderRequest::new(edits.clone()), &actor())
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY_ORDER));
        assert_eq!(copy, order);
        assert_eq!(h.reserved(order.id, BANDAGES), 10);

        manager
            .modify_order(&mut copy, &ModifyOrderRequest::new(edits).allowing_empty(), &actor())
            .unwrap();
        assert!(copy.items.iter().all(|i| i.status == ItemStatus::Cancelled));
        assert_eq!(copy.total_price, 0);
        assert_eq!(h.reserved(order.id, BANDAGES), 0);
        assert_eq!(h.reserved(order.id, SYRINGES), 0);

        let updated = manager.update_order(copy, UpdateOrderOptions::new(actor())).unwrap();
        assert_eq!(updated.order.version, order.version + 1);
    }

    #[test]
    fn modify_order_edits_adds_and_skips_lines() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let mut order = manager
            .create_order(
                CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Sales, actor()).with_line(BANDAGES, 10),
            )
            .unwrap();

        let request = ModifyOrderRequest::new(vec![
            DemandEdit::new(BANDAGES, 30).with_reason("outbreak"),
            DemandEdit::new(SYRINGES, 12),
            DemandEdit::new(SYRINGES, -5),
            DemandEdit::new(MaterialId::new(3), 0),
        ]);
        manager.modify_order(&mut order, &request, &actor()).unwrap();

        let bandages = order.item(BANDAGES).unwrap();
        assert_eq!(bandages.quantity, 30);
        assert_eq!(bandages.original_quantity, 10);
        assert_eq!(bandages.status, ItemStatus::Changed);
        assert_eq!(bandages.reason.as_deref(), Some("outbreak"));
        assert_eq!(order.item(SYRINGES).unwrap().quantity, 12);
        assert_eq!(order.item(SYRINGES).unwrap().original_quantity, 12);
        assert!(order.item(MaterialId::new(3)).is_none());
        assert_eq!(order.total_price, 30 * 250 + 12 * 100);
    }

    #[test]
    fn terminal_orders_cannot_be_modified() {
        let (_h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let mut cancelled = set_status(&manager, order.id, OrderStatus::Cancelled);

        let err = manager
            .modify_order(
                &mut cancelled,
                &ModifyOrderRequest::new(vec![DemandEdit::new(BANDAGES, 1)]),
                &actor(),
            )
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::ILLEGAL_TRANSITION));
    }

    #[test]
    fn terminal_orders_reject_line_changes_on_update() {
        let (_h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let mut cancelled = set_status(&manager, order.id, OrderStatus::Cancelled);
        cancelled.items[0].quantity = 99;

        let err = manager
            .update_order(cancelled, UpdateOrderOptions::new(actor()))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::ILLEGAL_TRANSITION));

        let stored = repo.get_order(order.id).unwrap().unwrap();
        assert_eq!(stored.items[0].quantity, 10);
        assert_eq!(stored.status, OrderStatus::Cancelled);
    }

    #[test]
    fn reference_id_update_is_audited_and_announced() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let events = h.bus.subscribe();

        let updated = manager
            .update_order_reference_id(order.id, Some("SO-9".to_string()), &actor())
            .unwrap();
        assert!(updated.changed);
        assert_eq!(updated.order.reference_id(), Some("SO-9"));
        assert_eq!(updated.order.version, order.version + 1);
        assert_eq!(repo.get_order(order.id).unwrap().unwrap().sales_reference_id.as_deref(), Some("SO-9"));
        assert_eq!(kinds(&events), vec![OrderEventKind::Modified]);
        assert!(h
            .activity
            .entries()
            .iter()
            .any(|a| a.field == "reference_id" && a.old_value.is_none() && a.new_value.as_deref() == Some("SO-9")));
        assert!(!h.locks.is_held(&LockKey::order(order.id)));

        let again = manager
            .update_order_reference_id(order.id, Some("SO-9".to_string()), &actor())
            .unwrap();
        assert!(!again.changed);
        assert_eq!(again.order.version, updated.order.version);
        assert!(events.drain().is_empty());
    }

    #[test]
    fn overflowing_line_total_is_rejected_without_storing() {
        let (_h, repo, manager) = setup(OrdersConfig::default());
        let request = CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Sales, actor())
            .with_line(BANDAGES, i64::MAX / 100);

        let err = manager.create_order(request).unwrap_err();
        assert_eq!(err.code(), Some(codes::AMOUNT_OUT_OF_RANGE));
        let page = repo.list_orders(&OrderFilter::default(), PageParams::all()).unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn reorder_persists_edits_under_one_lock() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let events = h.bus.subscribe();

        let request = ModifyOrderRequest {
            order_tags: Some(vec!["urgent".to_string(), " urgent ".to_string()]),
            payment: Some(PaymentRecord {
                amount: 100,
                option: None,
            }),
            reference_id: Some("SO-42".to_string()),
            ..ModifyOrderRequest::new(vec![DemandEdit::new(SYRINGES, 8)])
        };
        let updated = manager.reorder(order.id, request, &actor()).unwrap();

        assert_eq!(updated.order.version, 2);
        assert_eq!(updated.order.order_tags, vec!["urgent".to_string()]);
        assert_eq!(updated.order.reference_id(), Some("SO-42"));
        assert_eq!(updated.order.item(SYRINGES).unwrap().quantity, 8);
        assert_eq!(repo.get_order(order.id).unwrap().unwrap(), updated.order);
        assert_eq!(kinds(&events), vec![OrderEventKind::Paid]);
        assert!(!h.locks.is_held(&LockKey::order(order.id)));
    }

    #[test]
    fn fully_shipped_backorder_moves_on_with_its_shipments() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        set_status(&manager, order.id, OrderStatus::Backordered);
        h.shipments.insert(Shipment {
            id: ShipmentId::new("s-1"),
            order_id: order.id,
            status: ShipmentStatus::Fulfilled,
            items: vec![(BANDAGES, 10), (SYRINGES, 4)],
        });

        let mut copy = repo.get_order(order.id).unwrap().unwrap();
        for item in &mut copy.items {
            item.shipped_quantity = item.quantity;
        }
        let updated = manager.update_order(copy, UpdateOrderOptions::new(actor())).unwrap();

        assert_eq!(updated.order.status, OrderStatus::Fulfilled);
        let last = repo.status_history(order.id).unwrap().pop().unwrap();
        assert_eq!(last.old_status, Some(OrderStatus::Backordered));
        assert_eq!(last.new_status, OrderStatus::Fulfilled);
    }

    #[test]
    fn partially_shipped_backorder_stays_put() {
        let (_h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        set_status(&manager, order.id, OrderStatus::Backordered);

        let mut copy = repo.get_order(order.id).unwrap().unwrap();
        copy.items[0].shipped_quantity = 3;
        let updated = manager.update_order(copy, UpdateOrderOptions::new(actor())).unwrap();

        assert_eq!(updated.order.status, OrderStatus::Backordered);
    }

    #[test]
    fn ship_now_requires_an_open_order_with_outstanding_quantity() {
        let (_h, repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let ship = |order_id| ShipNowRequest {
            order_id,
            carrier: None,
            tracking_id: None,
            items: Vec::new(),
            actor: actor(),
        };

        let mut copy = repo.get_order(order.id).unwrap().unwrap();
        for item in &mut copy.items {
            item.shipped_quantity = item.quantity;
        }
        manager.update_order(copy, UpdateOrderOptions::new(actor())).unwrap();
        let err = manager.ship_now(ship(order.id)).unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY_ORDER));

        set_status(&manager, order.id, OrderStatus::Completed);
        let err = manager.ship_now(ship(order.id)).unwrap_err();
        assert_eq!(err.code(), Some(codes::ILLEGAL_TRANSITION));
    }

    #[test]
    fn ship_now_rejects_foreign_and_non_positive_lines() {
        let (h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let ship = |items: Vec<(MaterialId, i64)>| ShipNowRequest {
            order_id: order.id,
            carrier: None,
            tracking_id: None,
            items,
            actor: actor(),
        };

        let err = manager.ship_now(ship(vec![(BANDAGES, -5)])).unwrap_err();
        assert_eq!(err.code(), Some(codes::NEGATIVE_QUANTITY));
        let err = manager.ship_now(ship(vec![(BANDAGES, 0)])).unwrap_err();
        assert_eq!(err.code(), Some(codes::NEGATIVE_QUANTITY));
        let err = manager.ship_now(ship(vec![(BANDAGES, 2), (MaterialId::new(3), 1)])).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        assert!(h.shipments.shipments_by_order(order.id).unwrap().is_empty());

        manager.ship_now(ship(vec![(BANDAGES, 2)])).unwrap();
        assert_eq!(h.shipments.shipments_by_order(order.id).unwrap().len(), 1);
    }

    #[test]
    fn shipping_discrepancy_depends_on_shipped_quantity() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let queries = h.queries(repo.clone());
        let full = manager.create_order(sales_order()).unwrap();
        let partial = manager.create_order(sales_order()).unwrap();

        for (order_id, shipped) in [(full.id, None), (partial.id, Some(3))] {
            let mut copy = repo.get_order(order_id).unwrap().unwrap();
            for item in &mut copy.items {
                item.shipped_quantity = shipped.unwrap_or(item.quantity);
            }
            manager.update_order(copy, UpdateOrderOptions::new(actor())).unwrap();
            set_status(&manager, order_id, OrderStatus::Completed);
        }

        let criteria = DiscrepancyCriteria {
            kind: Some(DiscrepancyKind::ShippingDiscrepancy),
            ..DiscrepancyCriteria::default()
        };
        let page = queries.get_discrepancy_models(&criteria, PageParams::default()).unwrap();

        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|m| m.order_id == partial.id));
        let bandages = page.items.iter().find(|m| m.material_id == BANDAGES).unwrap();
        assert_eq!(bandages.material_name.as_deref(), Some("Bandages"));
        assert_eq!(bandages.customer_name.as_deref(), Some("District Clinic"));
        assert_eq!(bandages.vendor_name.as_deref(), Some("Central Store"));
        assert_eq!(bandages.shipped_quantity, 3);
        assert_eq!(bandages.original_quantity, 10);
    }

    #[test]
    fn shipped_discrepancy_reason_reaches_the_model() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let queries = h.queries(repo.clone());
        let order = manager.create_order(sales_order()).unwrap();

        let edit = DemandEdit::new(BANDAGES, 10).with_shipped_discrepancy_reason("vendor short on stock");
        manager
            .reorder(order.id, ModifyOrderRequest::new(vec![edit]), &actor())
            .unwrap();
        let mut copy = repo.get_order(order.id).unwrap().unwrap();
        for item in &mut copy.items {
            item.shipped_quantity = 3;
        }
        manager.update_order(copy, UpdateOrderOptions::new(actor())).unwrap();
        set_status(&manager, order.id, OrderStatus::Completed);

        let criteria = DiscrepancyCriteria {
            kind: Some(DiscrepancyKind::ShippingDiscrepancy),
            material_id: Some(BANDAGES),
            ..DiscrepancyCriteria::default()
        };
        let page = queries.get_discrepancy_models(&criteria, PageParams::default()).unwrap();

        assert_eq!(page.total, 1);
        assert_eq!(
            page.items[0].shipped_discrepancy_reason.as_deref(),
            Some("vendor short on stock")
        );
    }

    #[test]
    fn lead_time_runs_from_creation_to_fulfilment() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let queries = h.queries(repo.clone());
        let order = manager.create_order(sales_order()).unwrap();

        set_status(&manager, order.id, OrderStatus::Completed);
        assert_eq!(queries.lead_time(order.id).unwrap(), None);

        set_status(&manager, order.id, OrderStatus::Fulfilled);
        let fulfilled_at = repo.status_history(order.id).unwrap().pop().unwrap().at;
        let lead_time = queries.lead_time(order.id).unwrap().unwrap();
        assert_eq!(lead_time, fulfilled_at - order.created_at);
        assert!(lead_time >= chrono::Duration::zero());

        let err = queries.lead_time(OrderId::new(9_999)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn ordering_discrepancy_skips_lines_without_recommendation() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let queries = h.queries(repo.clone());
        let order = manager.create_order(sales_order()).unwrap();

        let page = queries
            .get_discrepancy_models(&DiscrepancyCriteria::default(), PageParams::default())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].order_id, order.id);
        assert_eq!(page.items[0].material_id, BANDAGES);
        assert_eq!(page.items[0].kinds, vec![DiscrepancyKind::OrderingDiscrepancy]);

        set_status(&manager, order.id, OrderStatus::Cancelled);
        let page = queries
            .get_discrepancy_models(&DiscrepancyCriteria::default(), PageParams::default())
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn recommended_quantity_uses_sentinel_when_unconfigured() {
        let (h, _repo, manager) = setup(OrdersConfig::default());
        assert_eq!(
            manager.compute_recommended_order_quantity(CUSTOMER, BANDAGES).unwrap(),
            RecommendedQuantity::Quantity(30)
        );
        let roq = manager.compute_recommended_order_quantity(CUSTOMER, SYRINGES).unwrap();
        assert_eq!(roq.as_i64(), -1);

        let mut full = InventorySnapshot::new(CUSTOMER, BANDAGES);
        full.stock = 60;
        full.max_stock = 50;
        h.inventory.put(full);
        assert_eq!(
            manager.compute_recommended_order_quantity(CUSTOMER, BANDAGES).unwrap(),
            RecommendedQuantity::Quantity(0)
        );

        let err = manager
            .compute_recommended_order_quantity(VENDOR, BANDAGES)
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::MATERIAL_UNAVAILABLE));
    }

    #[test]
    fn hidden_transfers_skip_the_created_event() {
        let cfg = OrdersConfig::default().with_hide_transfers_from_vendor(true);
        let (h, _repo, manager) = setup(cfg);
        let events = h.bus.subscribe();

        let transfer = manager
            .create_order(
                CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Transfer, actor())
                    .with_line(BANDAGES, 2)
                    .with_reference_id("TR-1"),
            )
            .unwrap();
        assert!(!transfer.visible_to_vendor);
        assert_eq!(transfer.transfer_reference_id.as_deref(), Some("TR-1"));
        assert!(kinds(&events).is_empty());

        manager.create_order(sales_order()).unwrap();
        assert_eq!(kinds(&events), vec![OrderEventKind::Created]);
    }

    #[test]
    fn messages_are_threaded_and_announced() {
        let (h, _repo, manager) = setup(OrdersConfig::default());
        let order = manager.create_order(sales_order()).unwrap();
        let events = h.bus.subscribe();

        let id = manager
            .add_message_to_order(order.id, "driver is late", &actor(), vec![UserId::new("bob")])
            .unwrap();

        assert_eq!(id, "msg-1");
        let published = events.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload().kind, OrderEventKind::Commented);
        assert_eq!(published[0].notify().user_ids, vec![UserId::new("bob")]);
        assert_eq!(published[0].object_id(), order.id.to_string());
    }

    #[test]
    fn clear_allocations_releases_open_orders_of_a_vendor() {
        let (h, repo, manager) = setup(goods_issue());
        let queries = h.queries(repo.clone());
        let first = manager.create_order(sales_order().confirmed()).unwrap();
        let second = manager.create_order(sales_order().confirmed()).unwrap();
        set_status(&manager, second.id, OrderStatus::Backordered);

        assert_eq!(queries.allocated_quantity(&first, BANDAGES).unwrap(), 10);

        let released = queries
            .clear_allocations(&ClearAllocationsRequest {
                backordered_only: true,
                ..ClearAllocationsRequest::for_vendor(VENDOR)
            })
            .unwrap();
        assert_eq!(released, 2);
        assert_eq!(h.reserved(second.id, BANDAGES), 0);
        assert_eq!(h.reserved(first.id, BANDAGES), 10);

        let released = queries
            .clear_allocations(&ClearAllocationsRequest::for_vendor(VENDOR))
            .unwrap();
        assert_eq!(released, 2);
        assert_eq!(queries.allocated_quantity(&first, SYRINGES).unwrap(), 0);
    }

    #[test]
    fn material_status_is_read_from_the_reservation() {
        let cfg = goods_issue().with_auto_assign_first_material_status(true);
        let (h, repo, manager) = setup(cfg);
        h.stock
            .set_material_statuses(BANDAGES, vec!["good".to_string(), "damaged".to_string()]);
        let queries = h.queries(repo);

        let order = manager.create_order(sales_order().confirmed()).unwrap();

        assert_eq!(
            queries.material_status(&order, BANDAGES).unwrap().as_deref(),
            Some("good")
        );
        assert_eq!(queries.material_status(&order, SYRINGES).unwrap(), None);
    }

    #[test]
    fn order_and_demand_queries_filter_and_page() {
        let (h, repo, manager) = setup(OrdersConfig::default());
        let queries = h.queries(repo);
        let first = manager.create_order(sales_order()).unwrap();
        let second = manager.create_order(sales_order()).unwrap();
        manager
            .create_order(
                CreateOrderRequest::new(DOMAIN, CUSTOMER, OrderType::Transfer, actor()).with_line(BANDAGES, 1),
            )
            .unwrap();
        set_status(&manager, first.id, OrderStatus::Backordered);

        let filter = OrderFilter {
            exclude_transfers: true,
            ..OrderFilter::default()
        };
        let page: Page<Order> = queries.get_orders(&filter, PageParams::new(0, 1)).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, second.id);

        let backordered = DemandFilter {
            backordered_only: true,
            ..DemandFilter::default()
        };
        let items: Vec<DemandItem> = queries
            .get_demand_items(&backordered, PageParams::default())
            .unwrap()
            .items;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.order_id == first.id));

        let history: Vec<StatusHistoryEntry> = queries.status_history(first.id).unwrap();
        assert_eq!(history.len(), 2);
    }

    /// Repository whose commits always fail.
    struct FailingCommits(InMemoryOrderRepository);

    impl OrderRepository for FailingCommits {
        fn next_order_id(&self) -> Result<OrderId, RepositoryError> {
            self.0.next_order_id()
        }

        fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
            self.0.get_order(order_id)
        }

        fn commit(&self, _unit: OrderUnit, _expected: ExpectedVersion) -> Result<Order, RepositoryError> {
            Err(RepositoryError::Storage("disk full".to_string()))
        }

        fn list_orders(&self, filter: &OrderFilter, page: PageParams) -> Result<Page<Order>, RepositoryError> {
            self.0.list_orders(filter, page)
        }

        fn demand_items(
            &self,
            filter: &DemandFilter,
            page: PageParams,
        ) -> Result<Page<(DemandItem, Order)>, RepositoryError> {
            self.0.demand_items(filter, page)
        }

        fn status_history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
            self.0.status_history(order_id)
        }
    }

    #[test]
    fn failed_commit_releases_reservations_and_publishes_nothing() {
        let h = Harness::new();
        let manager = h.manager(FailingCommits(InMemoryOrderRepository::new()), goods_issue());
        let events = h.bus.subscribe();

        let err = manager.create_order(sales_order().confirmed()).unwrap_err();

        assert!(matches!(err, DomainError::Internal(_)));
        assert_eq!(h.reserved(OrderId::new(1), BANDAGES), 0);
        assert_eq!(h.reserved(OrderId::new(1), SYRINGES), 0);
        assert!(events.drain().is_empty());
        assert!(h.tasks.tasks().is_empty());
    }
}
