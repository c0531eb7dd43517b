//! Order persistence boundary.
//!
//! An order, its demand items and any new status-history entries are written
//! as one unit: either everything lands or nothing does. The unit carries an
//! optimistic version expectation checked against the stored order.

mod in_memory;
mod query;

pub use in_memory::InMemoryOrderRepository;
pub use query::{DemandFilter, OrderFilter, Page, PageParams};

use std::sync::Arc;

use thiserror::Error;

use orderflow_core::{DomainError, ExpectedVersion, OrderId};
use orderflow_orders::{DemandItem, Order, StatusHistoryEntry};

/// Everything one lifecycle operation persists.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUnit {
    pub order: Order,
    /// Entries appended to the order's status history.
    pub history: Vec<StatusHistoryEntry>,
}

impl OrderUnit {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, entry: StatusHistoryEntry) -> Self {
        self.history.push(entry);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository lock poisoned")]
    Poisoned,

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<RepositoryError> for DomainError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(msg) => DomainError::conflict(msg),
            RepositoryError::NotFound(what) => DomainError::not_found(what),
            RepositoryError::Poisoned => DomainError::internal("repository lock poisoned"),
            RepositoryError::Storage(msg) => DomainError::internal(msg),
        }
    }
}

pub trait OrderRepository: Send + Sync {
    fn next_order_id(&self) -> Result<OrderId, RepositoryError>;

    fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Persist the unit atomically; returns the stored order with its new version.
    fn commit(&self, unit: OrderUnit, expected: ExpectedVersion) -> Result<Order, RepositoryError>;

    fn list_orders(&self, filter: &OrderFilter, page: PageParams) -> Result<Page<Order>, RepositoryError>;

    /// Demand items with their owning order, newest order first.
    fn demand_items(
        &self,
        filter: &DemandFilter,
        page: PageParams,
    ) -> Result<Page<(DemandItem, Order)>, RepositoryError>;

    fn status_history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError>;
}

impl<R> OrderRepository for Arc<R>
where
    R: OrderRepository + ?Sized,
{
    fn next_order_id(&self) -> Result<OrderId, RepositoryError> {
        (**self).next_order_id()
    }

    fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        (**self).get_order(order_id)
    }

    fn commit(&self, unit: OrderUnit, expected: ExpectedVersion) -> Result<Order, RepositoryError> {
        (**self).commit(unit, expected)
    }

    fn list_orders(&self, filter: &OrderFilter, page: PageParams) -> Result<Page<Order>, RepositoryError> {
        (**self).list_orders(filter, page)
    }

    fn demand_items(
        &self,
        filter: &DemandFilter,
        page: PageParams,
    ) -> Result<Page<(DemandItem, Order)>, RepositoryError> {
        (**self).demand_items(filter, page)
    }

    fn status_history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
        (**self).status_history(order_id)
    }
}
