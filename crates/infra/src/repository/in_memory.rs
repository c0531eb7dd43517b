use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use orderflow_core::{ExpectedVersion, OrderId};
use orderflow_orders::{DemandItem, Order, StatusHistoryEntry};

use super::query::{DemandFilter, OrderFilter, Page, PageParams};
use super::{OrderRepository, OrderUnit, RepositoryError};

#[derive(Debug, Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    history: HashMap<OrderId, Vec<StatusHistoryEntry>>,
}

/// In-memory order repository.
///
/// Intended for tests/dev. A commit takes the single write lock, so the
/// order row, its items and its history land together.
#[derive(Debug)]
pub struct InMemoryOrderRepository {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl Default for InMemoryOrderRepository {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.read().map(|t| t.orders.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn next_order_id(&self) -> Result<OrderId, RepositoryError> {
        Ok(OrderId::new(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn get_order(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let tables = self.tables.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(tables.orders.get(&order_id).cloned())
    }

    fn commit(&self, unit: OrderUnit, expected: ExpectedVersion) -> Result<Order, RepositoryError> {
        let OrderUnit { mut order, history } = unit;
        let mut tables = self.tables.write().map_err(|_| RepositoryError::Poisoned)?;

        let current = tables.orders.get(&order.id).map(|o| o.version);
        if !expected.matches(current) {
            return Err(RepositoryError::Conflict(format!(
                "order {}: expected {expected:?}, found {current:?}",
                order.id
            )));
        }

        order.version = current.unwrap_or(0) + 1;
        let order_id = order.id;
        tables.orders.insert(order_id, order.clone());
        if !history.is_empty() {
            tables.history.entry(order_id).or_default().extend(history);
        }
        debug!(%order_id, version = order.version, "order committed");
        Ok(order)
    }

    fn list_orders(&self, filter: &OrderFilter, page: PageParams) -> Result<Page<Order>, RepositoryError> {
        let tables = self.tables.read().map_err(|_| RepositoryError::Poisoned)?;
        let matches = tables
            .orders
            .values()
            .rev()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        Ok(Page::from_matches(matches, page))
    }

    fn demand_items(
        &self,
        filter: &DemandFilter,
        page: PageParams,
    ) -> Result<Page<(DemandItem, Order)>, RepositoryError> {
        let tables = self.tables.read().map_err(|_| RepositoryError::Poisoned)?;
        let matches = tables
            .orders
            .values()
            .rev()
            .flat_map(|o| {
                o.items
                    .iter()
                    .filter(move |i| filter.matches(o, i))
                    .map(move |i| (i.clone(), o.clone()))
            })
            .collect();
        Ok(Page::from_matches(matches, page))
    }

    fn status_history(&self, order_id: OrderId) -> Result<Vec<StatusHistoryEntry>, RepositoryError> {
        let tables = self.tables.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(tables.history.get(&order_id).cloned().unwrap_or_default())
    }
}
