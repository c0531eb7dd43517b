//! Order domain: the order aggregate, its status table, demand items and
//! discrepancy rules.
//!
//! Pure domain logic (no IO, no locking, no storage). Orchestration lives in
//! `orderflow-infra`.

pub mod demand;
pub mod discrepancy;
pub mod events;
pub mod order;
pub mod status;

pub use demand::{
    DemandEdit, DemandItem, DemandLedger, EditOutcome, RecommendedQuantity,
    compute_recommended_order_quantity,
};
pub use discrepancy::{DiscrepancyKind, DiscrepancySnapshot, classify};
pub use events::{OrderEvent, OrderEventKind};
pub use order::{Order, OrderType, PaymentRecord};
pub use status::{ItemStatus, OrderStatus, StatusHistoryEntry};
