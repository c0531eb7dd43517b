use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainId, OrderId};
use orderflow_events::Event;

use crate::status::OrderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventKind {
    Created,
    Modified,
    StatusChange,
    Paid,
    Commented,
}

/// Lifecycle fact published after an order mutation has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub domain_id: DomainId,
    pub kind: OrderEventKind,
    pub status: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(
        order_id: OrderId,
        domain_id: DomainId,
        kind: OrderEventKind,
        status: OrderStatus,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            domain_id,
            kind,
            status,
            occurred_at,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            OrderEventKind::Created => "orders.order.created",
            OrderEventKind::Modified => "orders.order.modified",
            OrderEventKind::StatusChange => "orders.order.status_changed",
            OrderEventKind::Paid => "orders.order.paid",
            OrderEventKind::Commented => "orders.order.commented",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
