//! `orderflow-core` — shared building blocks for the order engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult, codes};
pub use id::{DomainId, EntityId, MaterialId, OrderId, ShipmentId, UserId};
