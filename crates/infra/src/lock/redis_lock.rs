//! Redis-backed lock for multi-process deployments.
//!
//! `SET key token NX PX ttl` to acquire; a compare-and-delete script to
//! release so a lock that expired and was taken by someone else is never
//! removed. The owner token is `{process}:{thread}`, which keeps acquisition
//! re-entrant per thread like the in-memory manager.

use std::thread;
use std::time::Duration;

use redis::Commands;
use uuid::Uuid;

use super::{LockError, LockKey, LockManager, LockStatus};

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisLockManager {
    client: redis::Client,
    process: Uuid,
    ttl: Duration,
    prefix: String,
}

impl RedisLockManager {
    pub fn new(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            process: Uuid::now_v7(),
            ttl,
            prefix: "orderflow:lock:".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn token(&self) -> String {
        format!("{}:{:?}", self.process, thread::current().id())
    }

    fn redis_key(&self, key: &LockKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn connection(&self) -> Result<redis::Connection, LockError> {
        self.client
            .get_connection()
            .map_err(|e| LockError::Backend(e.to_string()))
    }
}

impl LockManager for RedisLockManager {
    fn acquire(&self, key: &LockKey) -> Result<LockStatus, LockError> {
        let mut conn = self.connection()?;
        let rkey = self.redis_key(key);
        let token = self.token();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);

        let set: Option<String> = redis::cmd("SET")
            .arg(&rkey)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query(&mut conn)
            .map_err(|e| LockError::Backend(e.to_string()))?;
        if set.is_some() {
            return Ok(LockStatus::Acquired);
        }

        let owner: Option<String> = conn
            .get(&rkey)
            .map_err(|e| LockError::Backend(e.to_string()))?;
        if owner.as_deref() == Some(token.as_str()) {
            Ok(LockStatus::AlreadyHeld)
        } else {
            Err(LockError::Contended(key.to_string()))
        }
    }

    fn release(&self, key: &LockKey) -> Result<bool, LockError> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.redis_key(key))
            .arg(self.token())
            .invoke(&mut conn)
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(removed == 1)
    }
}
