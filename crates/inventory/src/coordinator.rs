//! Automatic stock reservation against tagged operations.
//!
//! Stock is consumed first-expiry-first across batches, then from unbatched
//! stock. Availability of a batch is its on-hand quantity minus what other
//! tags already hold on it.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use orderflow_core::{EntityId, MaterialId};

use crate::allocation::{
    AllocationError, AllocationRequest, AllocationTag, InventoryAllocation, InventoryAllocator,
    OperationType,
};
use crate::store::{AllocationFilter, AllocationStore, StockSource};

/// Reserves and releases stock for orders and shipments.
#[derive(Debug)]
pub struct InventoryAllocationCoordinator<S, K> {
    store: S,
    stock: K,
    // Serializes the read-availability / insert sequence across callers.
    write_lock: Mutex<()>,
}

impl<S, K> InventoryAllocationCoordinator<S, K> {
    pub fn new(store: S, stock: K) -> Self {
        Self {
            store,
            stock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, K> InventoryAllocationCoordinator<S, K>
where
    S: AllocationStore,
    K: StockSource,
{
    /// Total quantity reserved for an operation on one material.
    pub fn allocated_quantity(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
        op_type: OperationType,
        op_id: &str,
    ) -> Result<i64, AllocationError> {
        Ok(self
            .get_allocations_by_type_id(entity_id, material_id, op_type, op_id)?
            .iter()
            .map(|a| a.quantity)
            .sum())
    }

    /// Material status stamped on the first reservation for an operation, if any.
    pub fn material_status(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
        op_type: OperationType,
        op_id: &str,
    ) -> Result<Option<String>, AllocationError> {
        Ok(self
            .get_allocations_by_type_id(entity_id, material_id, op_type, op_id)?
            .into_iter()
            .next()
            .and_then(|a| a.material_status))
    }

    fn held_per_batch(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
    ) -> Result<HashMap<Option<String>, i64>, AllocationError> {
        let mut held = HashMap::new();
        for a in self.store.find(&AllocationFilter::stock(entity_id, material_id))? {
            *held.entry(a.batch_id).or_insert(0) += a.quantity;
        }
        Ok(held)
    }
}

impl<S, K> InventoryAllocator for InventoryAllocationCoordinator<S, K>
where
    S: AllocationStore,
    K: StockSource,
{
    fn allocate_automatically(
        &self,
        request: &AllocationRequest,
    ) -> Result<Vec<InventoryAllocation>, AllocationError> {
        let _serial = self
            .write_lock
            .lock()
            .map_err(|_| AllocationError::Store("lock poisoned".to_string()))?;

        let AllocationRequest {
            entity_id,
            material_id,
            ref tag,
            quantity,
            ref actor,
            auto_assign_first_status,
        } = *request;

        let released = self.store.remove_matching(&AllocationFilter {
            entity_id: Some(entity_id),
            material_id: Some(material_id),
            tag: Some(tag.clone()),
        })?;
        if !released.is_empty() {
            debug!(%tag, %material_id, count = released.len(), "replacing earlier allocations");
        }
        if quantity <= 0 {
            return Ok(Vec::new());
        }

        let material_status = if auto_assign_first_status {
            self.stock.material_statuses(material_id).into_iter().next()
        } else {
            None
        };

        let held = self.held_per_batch(entity_id, material_id)?;
        let mut batches = self.stock.batches(entity_id, material_id)?;
        // Expiring batches first, unbatched stock last.
        batches.sort_by(|a, b| match (&a.batch_id, &b.batch_id) {
            (Some(_), None) => core::cmp::Ordering::Less,
            (None, Some(_)) => core::cmp::Ordering::Greater,
            _ => match (a.expiry, b.expiry) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => core::cmp::Ordering::Less,
                (None, Some(_)) => core::cmp::Ordering::Greater,
                (None, None) => core::cmp::Ordering::Equal,
            },
        });

        let mut remaining = quantity;
        let mut allocations = Vec::new();
        for batch in batches {
            if remaining == 0 {
                break;
            }
            let free = batch.on_hand - held.get(&batch.batch_id).copied().unwrap_or(0);
            if free <= 0 {
                continue;
            }
            let take = free.min(remaining);
            remaining -= take;
            allocations.push(InventoryAllocation {
                entity_id,
                material_id,
                tag: tag.clone(),
                quantity: take,
                batch_id: batch.batch_id,
                material_status: material_status.clone(),
                allocated_by: actor.clone(),
            });
        }

        self.store.insert(allocations.clone())?;

        let allocated = quantity - remaining;
        if remaining > 0 {
            warn!(%tag, %entity_id, %material_id, requested = quantity, allocated,
                "partial allocation");
            return Err(AllocationError::InsufficientStock {
                requested: quantity,
                allocated,
            });
        }
        info!(%tag, %entity_id, %material_id, quantity, "allocated stock");
        Ok(allocations)
    }

    fn clear_allocation_by_tag(
        &self,
        entity_id: Option<EntityId>,
        material_id: Option<MaterialId>,
        tag: &AllocationTag,
    ) -> Result<usize, AllocationError> {
        let _serial = self
            .write_lock
            .lock()
            .map_err(|_| AllocationError::Store("lock poisoned".to_string()))?;
        let removed = self.store.remove_matching(&AllocationFilter {
            entity_id,
            material_id,
            tag: Some(tag.clone()),
        })?;
        debug!(%tag, count = removed.len(), "released allocations");
        Ok(removed.len())
    }

    fn get_allocations_by_type_id(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
        op_type: OperationType,
        op_id: &str,
    ) -> Result<Vec<InventoryAllocation>, AllocationError> {
        self.store.find(&AllocationFilter {
            entity_id: Some(entity_id),
            material_id: Some(material_id),
            tag: Some(AllocationTag::new(op_type, op_id)),
        })
    }
}
