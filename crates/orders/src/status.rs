use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, DomainResult, OrderId, UserId, codes};

/// Order status lifecycle.
///
/// ```text
/// Pending ──► Confirmed ──► Backordered ──► Fulfilled
///    │            │              │
///    └────────────┴──► Completed ┴──► Fulfilled
///    any non-terminal except Completed ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Backordered,
    Completed,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Backordered,
        OrderStatus::Completed,
        OrderStatus::Fulfilled,
        OrderStatus::Cancelled,
    ];

    /// Stable short code used in storage and on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pn",
            OrderStatus::Confirmed => "cf",
            OrderStatus::Backordered => "bo",
            OrderStatus::Completed => "cm",
            OrderStatus::Fulfilled => "fl",
            OrderStatus::Cancelled => "cn",
        }
    }

    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Backordered, Completed, Cancelled],
            Confirmed => &[Backordered, Completed, Cancelled],
            Backordered => &[Completed, Fulfilled, Cancelled],
            Completed => &[Fulfilled],
            Fulfilled | Cancelled => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Reject a move that is not in the transition table.
    pub fn validate_transition(&self, next: OrderStatus) -> DomainResult<()> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(DomainError::validation_with_args(
            codes::ILLEGAL_TRANSITION,
            format!("cannot move order from {self} to {next}"),
            [self.code().to_string(), next.code().to_string()],
        ))
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|st| st.code() == s)
            .ok_or_else(|| DomainError::validation("STATUS", format!("unknown order status '{s}'")))
    }
}

/// Per-item status. Mirrors the order status plus `Changed` for edited lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Confirmed,
    Backordered,
    Completed,
    Fulfilled,
    Cancelled,
    Changed,
}

impl ItemStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pn",
            ItemStatus::Confirmed => "cf",
            ItemStatus::Backordered => "bo",
            ItemStatus::Completed => "cm",
            ItemStatus::Fulfilled => "fl",
            ItemStatus::Cancelled => "cn",
            ItemStatus::Changed => "ch",
        }
    }

    /// Statuses under which demand is still outstanding.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ItemStatus::Pending | ItemStatus::Confirmed | ItemStatus::Backordered | ItemStatus::Changed
        )
    }
}

impl From<OrderStatus> for ItemStatus {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::Pending => ItemStatus::Pending,
            OrderStatus::Confirmed => ItemStatus::Confirmed,
            OrderStatus::Backordered => ItemStatus::Backordered,
            OrderStatus::Completed => ItemStatus::Completed,
            OrderStatus::Fulfilled => ItemStatus::Fulfilled,
            OrderStatus::Cancelled => ItemStatus::Cancelled,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Append-only audit record of a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub order_id: OrderId,
    /// `None` for the entry written when the order is created.
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub actor: UserId,
    pub message_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusHistoryEntry {
    pub fn new(
        order_id: OrderId,
        old_status: Option<OrderStatus>,
        new_status: OrderStatus,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            old_status,
            new_status,
            actor,
            message_id: None,
            at,
        }
    }

    pub fn with_message(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }
}
