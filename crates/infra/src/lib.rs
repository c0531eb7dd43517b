//! Infrastructure layer: locking, persistence, collaborators, config and the
//! order lifecycle orchestration built on top of them.

pub mod collaborators;
pub mod config;
pub mod lifecycle;
pub mod lock;
pub mod queries;
pub mod repository;

mod integration_tests;

pub use config::{DomainConfigProvider, EngineConfig, OrdersConfig, StaticDomainConfig};
pub use lifecycle::{
    CreateOrderRequest, LineRequest, ModifyOrderRequest, OrderLifecycleManager, ShipNowRequest,
    UpdateOrderOptions, UpdateStatusRequest, UpdatedOrder,
};
pub use lock::{InMemoryLockManager, LockError, LockGuard, LockKey, LockManager, LockStatus};
pub use queries::{ClearAllocationsRequest, DiscrepancyCriteria, DiscrepancyModel, OrderQueries};
pub use repository::{
    DemandFilter, InMemoryOrderRepository, OrderFilter, OrderRepository, OrderUnit, Page,
    PageParams, RepositoryError,
};
