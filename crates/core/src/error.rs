//! Domain error model.

use thiserror::Error;

/// Result type used across the engine.
pub type DomainResult<T> = Result<T, DomainError>;

/// Stable validation codes surfaced to callers.
pub mod codes {
    /// Illegal status transition.
    pub const ILLEGAL_TRANSITION: &str = "O001";
    /// Order is locked by another operation.
    pub const ORDER_BUSY: &str = "O002";
    /// Order would be left without any item.
    pub const EMPTY_ORDER: &str = "O003";
    /// Quantity is negative.
    pub const NEGATIVE_QUANTITY: &str = "O004";
    /// Material has no inventory record at the entity.
    pub const MATERIAL_UNAVAILABLE: &str = "O005";
    /// A price or payment total does not fit the amount range.
    pub const AMOUNT_OUT_OF_RANGE: &str = "O006";
    /// Quantity is not a multiple of the handling unit.
    pub const HANDLING_UNIT_MISMATCH: &str = "T001";
}

/// Engine-level error.
///
/// `Validation` and `NotFound` are deterministic and never retried.
/// `LockContention` and `Conflict` are safe to retry by the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A business rule rejected the request.
    #[error("validation failed [{code}]: {message}")]
    Validation {
        code: String,
        message: String,
        args: Vec<String>,
    },

    /// A referenced order, material or entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The order lock is held by another operation.
    #[error("order busy: {0}")]
    LockContention(String),

    /// Stock could not be reserved in full.
    #[error("inventory allocation failed: {0}")]
    InventoryAllocation(String),

    /// The persisted aggregate changed since it was read.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected failure; any in-flight persistence unit was discarded.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(code: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.to_string(),
            message: message.into(),
            args: Vec::new(),
        }
    }

    pub fn validation_with_args(
        code: &str,
        message: impl Into<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Self {
        Self::Validation {
            code: code.to_string(),
            message: message.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn lock_contention(key: impl Into<String>) -> Self {
        Self::LockContention(key.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Validation code, if this is a validation failure.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Validation { code, .. } => Some(code),
            Self::LockContention(_) => Some(codes::ORDER_BUSY),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention(_) | Self::Conflict(_))
    }
}
