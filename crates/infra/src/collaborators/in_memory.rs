//! In-memory collaborators for tests/dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use orderflow_core::{DomainError, DomainResult, EntityId, MaterialId, OrderId, ShipmentId, UserId};
use orderflow_inventory::InventorySnapshot;

use super::{
    Activity, ActivityRecorder, ConversationService, DeferredTask, Entity, EntityCatalog,
    HandlingUnit, HandlingUnitService, InventoryService, Material, MaterialCatalog, Shipment,
    ShipmentRequest, ShipmentService, ShipmentStatus, Tag, TagKind, TagService, TaskScheduler,
};

fn poisoned() -> DomainError {
    DomainError::internal("collaborator lock poisoned")
}

/// Material and entity master data.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    materials: RwLock<HashMap<MaterialId, Material>>,
    entities: RwLock<HashMap<EntityId, Entity>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material(&self, material: Material) {
        if let Ok(mut m) = self.materials.write() {
            m.insert(material.id, material);
        }
    }

    pub fn add_entity(&self, entity: Entity) {
        if let Ok(mut e) = self.entities.write() {
            e.insert(entity.id, entity);
        }
    }
}

impl MaterialCatalog for InMemoryCatalog {
    fn material(&self, material_id: MaterialId) -> Option<Material> {
        self.materials.read().ok()?.get(&material_id).cloned()
    }
}

impl EntityCatalog for InMemoryCatalog {
    fn entity(&self, entity_id: EntityId) -> Option<Entity> {
        self.entities.read().ok()?.get(&entity_id).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventoryService {
    records: RwLock<HashMap<(EntityId, MaterialId), InventorySnapshot>>,
    reorder_durations: RwLock<HashMap<(EntityId, MaterialId), f64>>,
}

impl InMemoryInventoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, snapshot: InventorySnapshot) {
        if let Ok(mut r) = self.records.write() {
            r.insert((snapshot.entity_id, snapshot.material_id), snapshot);
        }
    }

    pub fn set_duration_from_reorder_point(&self, entity_id: EntityId, material_id: MaterialId, days: f64) {
        if let Ok(mut d) = self.reorder_durations.write() {
            d.insert((entity_id, material_id), days);
        }
    }
}

impl InventoryService for InMemoryInventoryService {
    fn inventory(&self, entity_id: EntityId, material_id: MaterialId) -> Option<InventorySnapshot> {
        self.records.read().ok()?.get(&(entity_id, material_id)).cloned()
    }

    fn duration_from_reorder_point(&self, entity_id: EntityId, material_id: MaterialId) -> Option<f64> {
        self.reorder_durations
            .read()
            .ok()?
            .get(&(entity_id, material_id))
            .copied()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHandlingUnits {
    units: RwLock<HashMap<MaterialId, HandlingUnit>>,
}

impl InMemoryHandlingUnits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, material_id: MaterialId, unit: HandlingUnit) {
        if let Ok(mut u) = self.units.write() {
            u.insert(material_id, unit);
        }
    }
}

impl HandlingUnitService for InMemoryHandlingUnits {
    fn handling_unit(&self, material_id: MaterialId) -> Option<HandlingUnit> {
        self.units.read().ok()?.get(&material_id).cloned()
    }
}

/// Shipments are created already shipped.
#[derive(Debug)]
pub struct InMemoryShipmentService {
    shipments: RwLock<Vec<Shipment>>,
    next: AtomicU64,
}

impl Default for InMemoryShipmentService {
    fn default() -> Self {
        Self {
            shipments: RwLock::new(Vec::new()),
            next: AtomicU64::new(1),
        }
    }
}

impl InMemoryShipmentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shipment: Shipment) {
        if let Ok(mut s) = self.shipments.write() {
            s.push(shipment);
        }
    }
}

impl ShipmentService for InMemoryShipmentService {
    fn shipments_by_order(&self, order_id: OrderId) -> DomainResult<Vec<Shipment>> {
        let all = self.shipments.read().map_err(|_| poisoned())?;
        Ok(all.iter().filter(|s| s.order_id == order_id).cloned().collect())
    }

    fn update_shipment_status(
        &self,
        shipment_id: &ShipmentId,
        status: ShipmentStatus,
        _actor: &UserId,
        _reason: Option<&str>,
    ) -> DomainResult<()> {
        let mut all = self.shipments.write().map_err(|_| poisoned())?;
        let shipment = all
            .iter_mut()
            .find(|s| &s.id == shipment_id)
            .ok_or_else(|| DomainError::not_found(format!("shipment {shipment_id}")))?;
        shipment.status = status;
        Ok(())
    }

    fn create_shipment(&self, request: ShipmentRequest) -> DomainResult<ShipmentId> {
        let id = ShipmentId::new(format!(
            "{}-{}",
            request.order_id,
            self.next.fetch_add(1, Ordering::SeqCst)
        ));
        let mut all = self.shipments.write().map_err(|_| poisoned())?;
        all.push(Shipment {
            id: id.clone(),
            order_id: request.order_id,
            status: ShipmentStatus::Shipped,
            items: request.items,
        });
        Ok(id)
    }
}

/// Assigns sequential ids to names, per kind.
#[derive(Debug, Default)]
pub struct InMemoryTagService {
    tags: Mutex<HashMap<(TagKind, String), u64>>,
}

impl InMemoryTagService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagService for InMemoryTagService {
    fn resolve(&self, kind: TagKind, names: &[String]) -> Vec<Tag> {
        let Ok(mut tags) = self.tags.lock() else {
            return Vec::new();
        };
        let mut out: Vec<Tag> = Vec::with_capacity(names.len());
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if out.iter().any(|t| t.name == name) {
                continue;
            }
            let next = tags.len() as u64 + 1;
            let id = *tags.entry((kind, name.to_string())).or_insert(next);
            out.push(Tag {
                id,
                name: name.to_string(),
            });
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct RecordingActivity {
    entries: Mutex<Vec<Activity>>,
}

impl RecordingActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Activity> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ActivityRecorder for RecordingActivity {
    fn record(&self, activity: Activity) {
        if let Ok(mut e) = self.entries.lock() {
            e.push(activity);
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConversations {
    messages: Mutex<Vec<(String, String, String, UserId)>>,
}

impl InMemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts posted on one object's thread, oldest first.
    pub fn thread(&self, object_type: &str, object_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| {
                m.iter()
                    .filter(|(ty, id, _, _)| ty == object_type && id == object_id)
                    .map(|(_, _, text, _)| text.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ConversationService for InMemoryConversations {
    fn add_message(
        &self,
        object_type: &str,
        object_id: &str,
        text: &str,
        actor: &UserId,
    ) -> DomainResult<String> {
        let mut m = self.messages.lock().map_err(|_| poisoned())?;
        m.push((
            object_type.to_string(),
            object_id.to_string(),
            text.to_string(),
            actor.clone(),
        ));
        Ok(format!("msg-{}", m.len()))
    }
}

#[derive(Debug, Default)]
pub struct RecordingTaskScheduler {
    tasks: Mutex<Vec<DeferredTask>>,
}

impl RecordingTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<DeferredTask> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl TaskScheduler for RecordingTaskScheduler {
    fn schedule(&self, task: DeferredTask) {
        if let Ok(mut t) = self.tasks.lock() {
            t.push(task);
        }
    }
}
