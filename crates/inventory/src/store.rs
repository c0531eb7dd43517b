use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use orderflow_core::{EntityId, MaterialId};

use crate::allocation::{AllocationError, AllocationTag, InventoryAllocation};
use crate::snapshot::StockBatch;

/// Selects allocations; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationFilter {
    pub entity_id: Option<EntityId>,
    pub material_id: Option<MaterialId>,
    pub tag: Option<AllocationTag>,
}

impl AllocationFilter {
    pub fn tag(tag: AllocationTag) -> Self {
        Self {
            tag: Some(tag),
            ..Self::default()
        }
    }

    pub fn stock(entity_id: EntityId, material_id: MaterialId) -> Self {
        Self {
            entity_id: Some(entity_id),
            material_id: Some(material_id),
            tag: None,
        }
    }

    pub fn matches(&self, a: &InventoryAllocation) -> bool {
        self.entity_id.is_none_or(|e| e == a.entity_id)
            && self.material_id.is_none_or(|m| m == a.material_id)
            && self.tag.as_ref().is_none_or(|t| *t == a.tag)
    }
}

/// Persistence boundary for allocations.
pub trait AllocationStore: Send + Sync {
    fn insert(&self, allocations: Vec<InventoryAllocation>) -> Result<(), AllocationError>;
    /// Remove and return every allocation matching the filter.
    fn remove_matching(
        &self,
        filter: &AllocationFilter,
    ) -> Result<Vec<InventoryAllocation>, AllocationError>;
    fn find(&self, filter: &AllocationFilter) -> Result<Vec<InventoryAllocation>, AllocationError>;
}

impl<S> AllocationStore for Arc<S>
where
    S: AllocationStore + ?Sized,
{
    fn insert(&self, allocations: Vec<InventoryAllocation>) -> Result<(), AllocationError> {
        (**self).insert(allocations)
    }

    fn remove_matching(
        &self,
        filter: &AllocationFilter,
    ) -> Result<Vec<InventoryAllocation>, AllocationError> {
        (**self).remove_matching(filter)
    }

    fn find(&self, filter: &AllocationFilter) -> Result<Vec<InventoryAllocation>, AllocationError> {
        (**self).find(filter)
    }
}

/// Source of on-hand stock and material status vocabulary.
pub trait StockSource: Send + Sync {
    fn batches(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
    ) -> Result<Vec<StockBatch>, AllocationError>;

    /// Configured material statuses, in preference order.
    fn material_statuses(&self, material_id: MaterialId) -> Vec<String>;
}

impl<S> StockSource for Arc<S>
where
    S: StockSource + ?Sized,
{
    fn batches(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
    ) -> Result<Vec<StockBatch>, AllocationError> {
        (**self).batches(entity_id, material_id)
    }

    fn material_statuses(&self, material_id: MaterialId) -> Vec<String> {
        (**self).material_statuses(material_id)
    }
}

/// In-memory allocation store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAllocationStore {
    inner: RwLock<Vec<InventoryAllocation>>,
}

impl InMemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> AllocationError {
    AllocationError::Store("lock poisoned".to_string())
}

impl AllocationStore for InMemoryAllocationStore {
    fn insert(&self, allocations: Vec<InventoryAllocation>) -> Result<(), AllocationError> {
        let mut all = self.inner.write().map_err(|_| poisoned())?;
        all.extend(allocations);
        Ok(())
    }

    fn remove_matching(
        &self,
        filter: &AllocationFilter,
    ) -> Result<Vec<InventoryAllocation>, AllocationError> {
        let mut all = self.inner.write().map_err(|_| poisoned())?;
        let (removed, kept): (Vec<_>, Vec<_>) = all.drain(..).partition(|a| filter.matches(a));
        *all = kept;
        Ok(removed)
    }

    fn find(&self, filter: &AllocationFilter) -> Result<Vec<InventoryAllocation>, AllocationError> {
        let all = self.inner.read().map_err(|_| poisoned())?;
        Ok(all.iter().filter(|a| filter.matches(a)).cloned().collect())
    }
}

/// In-memory stock source for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStockSource {
    batches: RwLock<HashMap<(EntityId, MaterialId), Vec<StockBatch>>>,
    statuses: RwLock<HashMap<MaterialId, Vec<String>>>,
}

impl InMemoryStockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stock(&self, entity_id: EntityId, material_id: MaterialId, batches: Vec<StockBatch>) {
        if let Ok(mut map) = self.batches.write() {
            map.insert((entity_id, material_id), batches);
        }
    }

    pub fn set_material_statuses(&self, material_id: MaterialId, statuses: Vec<String>) {
        if let Ok(mut map) = self.statuses.write() {
            map.insert(material_id, statuses);
        }
    }
}

impl StockSource for InMemoryStockSource {
    fn batches(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
    ) -> Result<Vec<StockBatch>, AllocationError> {
        let map = self.batches.read().map_err(|_| poisoned())?;
        Ok(map.get(&(entity_id, material_id)).cloned().unwrap_or_default())
    }

    fn material_statuses(&self, material_id: MaterialId) -> Vec<String> {
        self.statuses
            .read()
            .ok()
            .and_then(|m| m.get(&material_id).cloned())
            .unwrap_or_default()
    }
}
