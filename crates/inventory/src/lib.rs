//! Inventory snapshots and stock reservation against orders.
//!
//! Reservations ("allocations") are grouped by a typed correlation tag such as
//! `ORDER:4821`; the tag, not an allocation id, is the unit of release.

pub mod allocation;
pub mod coordinator;
pub mod snapshot;
pub mod store;

pub use allocation::{
    AllocationError, AllocationRequest, AllocationTag, InventoryAllocation, InventoryAllocator,
    OperationType,
};
pub use coordinator::InventoryAllocationCoordinator;
pub use snapshot::{InventoryModel, InventorySnapshot, StockBatch};
pub use store::{
    AllocationFilter, AllocationStore, InMemoryAllocationStore, InMemoryStockSource, StockSource,
};
