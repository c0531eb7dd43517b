use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use orderflow_core::{DomainError, EntityId, MaterialId, OrderId, UserId};

/// Kind of operation a reservation is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Order,
    Shipment,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Order => "ORDER",
            OperationType::Shipment => "SHIPMENT",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER" => Ok(OperationType::Order),
            "SHIPMENT" => Ok(OperationType::Shipment),
            other => Err(DomainError::validation(
                "TAG",
                format!("unknown operation type '{other}'"),
            )),
        }
    }
}

/// Correlation key `{OperationType}:{OperationId}` shared by a set of allocations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationTag {
    pub op_type: OperationType,
    pub op_id: String,
}

impl AllocationTag {
    pub fn new(op_type: OperationType, op_id: impl Into<String>) -> Self {
        Self {
            op_type,
            op_id: op_id.into(),
        }
    }

    pub fn order(order_id: OrderId) -> Self {
        Self::new(OperationType::Order, order_id.to_string())
    }
}

impl fmt::Display for AllocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op_type, self.op_id)
    }
}

impl FromStr for AllocationTag {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, id) = s
            .split_once(':')
            .ok_or_else(|| DomainError::validation("TAG", format!("malformed tag '{s}'")))?;
        if id.is_empty() {
            return Err(DomainError::validation("TAG", format!("empty operation id in '{s}'")));
        }
        Ok(Self::new(ty.parse()?, id))
    }
}

/// Stock reserved against an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAllocation {
    pub entity_id: EntityId,
    pub material_id: MaterialId,
    pub tag: AllocationTag,
    pub quantity: i64,
    pub batch_id: Option<String>,
    pub material_status: Option<String>,
    pub allocated_by: UserId,
}

/// Request to reserve `quantity` of a material at an entity for a tagged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub entity_id: EntityId,
    pub material_id: MaterialId,
    pub tag: AllocationTag,
    pub quantity: i64,
    pub actor: UserId,
    pub auto_assign_first_status: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Only part of the request could be reserved; the partial set was kept.
    #[error("insufficient stock: requested {requested}, allocated {allocated}")]
    InsufficientStock { requested: i64, allocated: i64 },

    #[error("allocation store failure: {0}")]
    Store(String),
}

impl From<AllocationError> for DomainError {
    fn from(value: AllocationError) -> Self {
        DomainError::InventoryAllocation(value.to_string())
    }
}

/// Reservation service used by the order lifecycle.
///
/// Callers treat `allocate_automatically` failures as non-fatal: they log and
/// continue without rolling back the enclosing order operation.
pub trait InventoryAllocator: Send + Sync {
    /// Reserve stock for the request, replacing any earlier reservation of the
    /// same material under the same tag.
    fn allocate_automatically(
        &self,
        request: &AllocationRequest,
    ) -> Result<Vec<InventoryAllocation>, AllocationError>;

    /// Release every allocation carrying `tag`, optionally narrowed by entity and material.
    /// Returns the number of allocations released.
    fn clear_allocation_by_tag(
        &self,
        entity_id: Option<EntityId>,
        material_id: Option<MaterialId>,
        tag: &AllocationTag,
    ) -> Result<usize, AllocationError>;

    fn get_allocations_by_type_id(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
        op_type: OperationType,
        op_id: &str,
    ) -> Result<Vec<InventoryAllocation>, AllocationError>;
}

impl<A> InventoryAllocator for Arc<A>
where
    A: InventoryAllocator + ?Sized,
{
    fn allocate_automatically(
        &self,
        request: &AllocationRequest,
    ) -> Result<Vec<InventoryAllocation>, AllocationError> {
        (**self).allocate_automatically(request)
    }

    fn clear_allocation_by_tag(
        &self,
        entity_id: Option<EntityId>,
        material_id: Option<MaterialId>,
        tag: &AllocationTag,
    ) -> Result<usize, AllocationError> {
        (**self).clear_allocation_by_tag(entity_id, material_id, tag)
    }

    fn get_allocations_by_type_id(
        &self,
        entity_id: EntityId,
        material_id: MaterialId,
        op_type: OperationType,
        op_id: &str,
    ) -> Result<Vec<InventoryAllocation>, AllocationError> {
        (**self).get_allocations_by_type_id(entity_id, material_id, op_type, op_id)
    }
}
