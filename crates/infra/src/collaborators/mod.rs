//! Services the lifecycle manager consumes but does not own.
//!
//! Each trait is injected into [`crate::lifecycle::OrderLifecycleManager`]
//! through [`Collaborators`]. The in-memory implementations back tests and
//! single-process setups.

mod in_memory;
mod notifier;

pub use in_memory::{
    InMemoryCatalog, InMemoryConversations, InMemoryHandlingUnits, InMemoryInventoryService,
    InMemoryShipmentService, InMemoryTagService, RecordingActivity, RecordingTaskScheduler,
};
pub use notifier::{BusEventNotifier, EventNotifier, NotifyError};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainResult, EntityId, MaterialId, OrderId, ShipmentId, UserId};
use orderflow_inventory::InventorySnapshot;
use orderflow_orders::{Order, OrderStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    /// Default retail price in smallest currency unit.
    pub retail_price: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub default_vendor: Option<EntityId>,
    pub tax_bps: u32,
    pub currency: Option<String>,
    pub tags: Vec<String>,
}

/// Fixed pack size a material must be ordered in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlingUnit {
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipmentStatus {
    Open,
    Shipped,
    Fulfilled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub order_id: OrderId,
    pub status: ShipmentStatus,
    pub items: Vec<(MaterialId, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub order_id: OrderId,
    pub vendor_id: Option<EntityId>,
    pub customer_id: EntityId,
    pub carrier: Option<String>,
    pub tracking_id: Option<String>,
    pub items: Vec<(MaterialId, i64)>,
    pub actor: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Entity,
    Material,
    Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

/// Audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub object_type: String,
    pub object_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: UserId,
    pub at: DateTime<Utc>,
}

/// Side effect executed outside the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredTask {
    /// Recompute the last-activity timestamps of the listed entities.
    RefreshEntityActivity { entity_ids: Vec<EntityId> },
}

pub trait MaterialCatalog: Send + Sync {
    fn material(&self, material_id: MaterialId) -> Option<Material>;
}

pub trait EntityCatalog: Send + Sync {
    fn entity(&self, entity_id: EntityId) -> Option<Entity>;
}

pub trait InventoryService: Send + Sync {
    fn inventory(&self, entity_id: EntityId, material_id: MaterialId) -> Option<InventorySnapshot>;

    /// Days since stock at the entity crossed its reorder point.
    fn duration_from_reorder_point(&self, entity_id: EntityId, material_id: MaterialId) -> Option<f64>;
}

pub trait HandlingUnitService: Send + Sync {
    fn handling_unit(&self, material_id: MaterialId) -> Option<HandlingUnit>;
}

pub trait ShipmentService: Send + Sync {
    fn shipments_by_order(&self, order_id: OrderId) -> DomainResult<Vec<Shipment>>;

    fn update_shipment_status(
        &self,
        shipment_id: &ShipmentId,
        status: ShipmentStatus,
        actor: &UserId,
        reason: Option<&str>,
    ) -> DomainResult<()>;

    fn create_shipment(&self, request: ShipmentRequest) -> DomainResult<ShipmentId>;

    /// Order status implied by its shipments once everything has shipped.
    fn overall_status(&self, shipments: &[Shipment], _order: &Order) -> OrderStatus {
        let mut live = shipments
            .iter()
            .filter(|s| s.status != ShipmentStatus::Cancelled)
            .peekable();
        if live.peek().is_some() && live.all(|s| s.status == ShipmentStatus::Fulfilled) {
            OrderStatus::Fulfilled
        } else {
            OrderStatus::Completed
        }
    }
}

pub trait TagService: Send + Sync {
    /// Resolve names to tags, registering unknown names.
    fn resolve(&self, kind: TagKind, names: &[String]) -> Vec<Tag>;
}

pub trait ActivityRecorder: Send + Sync {
    fn record(&self, activity: Activity);
}

pub trait ConversationService: Send + Sync {
    /// Append a message to the object's thread; returns the message id.
    fn add_message(
        &self,
        object_type: &str,
        object_id: &str,
        text: &str,
        actor: &UserId,
    ) -> DomainResult<String>;
}

pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, task: DeferredTask);
}

/// Injected collaborator set.
#[derive(Clone)]
pub struct Collaborators {
    pub materials: Arc<dyn MaterialCatalog>,
    pub entities: Arc<dyn EntityCatalog>,
    pub inventory: Arc<dyn InventoryService>,
    pub handling_units: Arc<dyn HandlingUnitService>,
    pub shipments: Arc<dyn ShipmentService>,
    pub tags: Arc<dyn TagService>,
    pub activity: Arc<dyn ActivityRecorder>,
    pub conversations: Arc<dyn ConversationService>,
    pub notifier: Arc<dyn EventNotifier>,
    pub tasks: Arc<dyn TaskScheduler>,
}

impl core::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
