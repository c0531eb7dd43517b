use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use tracing::debug;

use super::{LockError, LockKey, LockManager, LockStatus};

/// Single-process lock table keyed by string, owned per thread.
#[derive(Debug)]
pub struct InMemoryLockManager {
    held: Mutex<HashMap<LockKey, ThreadId>>,
    enabled: bool,
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// With locking off every acquire yields `NotRequired`.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains_key(key))
            .unwrap_or(false)
    }
}

impl LockManager for InMemoryLockManager {
    fn acquire(&self, key: &LockKey) -> Result<LockStatus, LockError> {
        if !self.enabled {
            return Ok(LockStatus::NotRequired);
        }
        let me = thread::current().id();
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock table poisoned".to_string()))?;

        match held.get(key) {
            Some(owner) if *owner == me => Ok(LockStatus::AlreadyHeld),
            Some(_) => {
                debug!(%key, "lock contended");
                Err(LockError::Contended(key.to_string()))
            }
            None => {
                held.insert(key.clone(), me);
                Ok(LockStatus::Acquired)
            }
        }
    }

    fn release(&self, key: &LockKey) -> Result<bool, LockError> {
        if !self.enabled {
            return Ok(false);
        }
        let me = thread::current().id();
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Backend("lock table poisoned".to_string()))?;

        if held.get(key) == Some(&me) {
            held.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
