//! Keyed mutual exclusion around single-order read-modify-write sequences.
//!
//! Acquisition is non-blocking and single-attempt. A key held by another
//! owner surfaces as [`LockError::Contended`]; retry policy belongs to the
//! caller. Re-acquiring a key the current owner already holds yields
//! [`LockStatus::AlreadyHeld`], and only the original acquirer releases.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_lock;

pub use in_memory::InMemoryLockManager;
#[cfg(feature = "redis")]
pub use redis_lock::RedisLockManager;

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use orderflow_core::{DomainError, OrderId, codes};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn order(order_id: OrderId) -> Self {
        Self(format!("order:{order_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    AlreadyHeld,
    /// Locking is disabled.
    NotRequired,
}

impl LockStatus {
    pub fn should_release(&self) -> bool {
        matches!(self, LockStatus::Acquired)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock '{0}' is held by another operation")]
    Contended(String),

    #[error("lock backend failure: {0}")]
    Backend(String),
}

impl From<LockError> for DomainError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Contended(key) => DomainError::lock_contention(format!(
                "[{}] {key} is being updated by another operation, retry later",
                codes::ORDER_BUSY
            )),
            LockError::Backend(msg) => DomainError::internal(msg),
        }
    }
}

pub trait LockManager: Send + Sync {
    fn acquire(&self, key: &LockKey) -> Result<LockStatus, LockError>;

    /// Returns `false` when the key was not held by the caller.
    fn release(&self, key: &LockKey) -> Result<bool, LockError>;
}

impl<L> LockManager for Arc<L>
where
    L: LockManager + ?Sized,
{
    fn acquire(&self, key: &LockKey) -> Result<LockStatus, LockError> {
        (**self).acquire(key)
    }

    fn release(&self, key: &LockKey) -> Result<bool, LockError> {
        (**self).release(key)
    }
}

/// Scoped lock; releases on drop when this guard did the acquiring.
#[derive(Debug)]
pub struct LockGuard<'a, L: LockManager + ?Sized> {
    manager: &'a L,
    key: LockKey,
    status: LockStatus,
}

impl<'a, L: LockManager + ?Sized> LockGuard<'a, L> {
    pub fn acquire(manager: &'a L, key: LockKey) -> Result<Self, LockError> {
        let status = manager.acquire(&key)?;
        Ok(Self {
            manager,
            key,
            status,
        })
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl<L: LockManager + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if !self.status.should_release() {
            return;
        }
        match self.manager.release(&self.key) {
            Ok(true) => {}
            Ok(false) => warn!(key = %self.key, "lock was no longer held at release"),
            Err(e) => warn!(key = %self.key, error = %e, "unable to release lock for key"),
        }
    }
}
