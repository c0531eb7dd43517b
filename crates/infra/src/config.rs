//! Engine configuration.
//!
//! Order policy is resolved per domain through [`DomainConfigProvider`].
//! [`EngineConfig`] is the JSON-loadable top level, pointed at by the
//! `ORDERFLOW_CONFIG` environment variable.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use orderflow_core::DomainId;
use orderflow_observability::TracingConfig;

use crate::lock::InMemoryLockManager;

pub const CONFIG_ENV: &str = "ORDERFLOW_CONFIG";

#[cfg(feature = "redis")]
const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

/// Order policy switches for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    /// Reserve and release stock automatically as orders move.
    pub auto_goods_issue: bool,
    pub allocate_stock_on_confirmation: bool,
    /// Stamp the material's first configured status on new allocations.
    pub auto_assign_first_material_status: bool,
    /// Sales orders may be created directly in `Confirmed`.
    pub allow_sales_order_as_confirmed: bool,
    pub hide_transfers_from_vendor: bool,
    pub locking_enabled: bool,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            auto_goods_issue: false,
            allocate_stock_on_confirmation: false,
            auto_assign_first_material_status: false,
            allow_sales_order_as_confirmed: false,
            hide_transfers_from_vendor: false,
            locking_enabled: true,
        }
    }
}

impl OrdersConfig {
    pub fn with_auto_goods_issue(mut self, enabled: bool) -> Self {
        self.auto_goods_issue = enabled;
        self
    }

    pub fn with_allocate_stock_on_confirmation(mut self, enabled: bool) -> Self {
        self.allocate_stock_on_confirmation = enabled;
        self
    }

    pub fn with_auto_assign_first_material_status(mut self, enabled: bool) -> Self {
        self.auto_assign_first_material_status = enabled;
        self
    }

    pub fn with_allow_sales_order_as_confirmed(mut self, enabled: bool) -> Self {
        self.allow_sales_order_as_confirmed = enabled;
        self
    }

    pub fn with_hide_transfers_from_vendor(mut self, enabled: bool) -> Self {
        self.hide_transfers_from_vendor = enabled;
        self
    }

    pub fn with_locking_enabled(mut self, enabled: bool) -> Self {
        self.locking_enabled = enabled;
        self
    }
}

pub trait DomainConfigProvider: Send + Sync {
    fn orders_config(&self, domain_id: DomainId) -> OrdersConfig;
}

/// Fixed configuration: a default plus per-domain overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticDomainConfig {
    default: OrdersConfig,
    overrides: HashMap<DomainId, OrdersConfig>,
}

impl StaticDomainConfig {
    pub fn new(default: OrdersConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_domain(mut self, domain_id: DomainId, config: OrdersConfig) -> Self {
        self.overrides.insert(domain_id, config);
        self
    }
}

impl DomainConfigProvider for StaticDomainConfig {
    fn orders_config(&self, domain_id: DomainId) -> OrdersConfig {
        self.overrides
            .get(&domain_id)
            .unwrap_or(&self.default)
            .clone()
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub orders: OrdersConfig,
    /// Per-domain order policy, keyed by domain id.
    pub domains: HashMap<DomainId, OrdersConfig>,
    pub tracing: TracingConfig,
    /// Lock backend; in-process locking when unset.
    pub redis_url: Option<String>,
    pub lock_ttl_ms: Option<u64>,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid engine configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine configuration from {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Load from the file named by `ORDERFLOW_CONFIG`; defaults when unset.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn domain_config(&self) -> StaticDomainConfig {
        self.domains.iter().fold(
            StaticDomainConfig::new(self.orders.clone()),
            |cfg, (domain, orders)| cfg.with_domain(*domain, orders.clone()),
        )
    }

    pub fn init_tracing(&self) {
        orderflow_observability::tracing::init(&self.tracing);
    }

    /// In-process lock table honouring the global `locking_enabled` switch.
    pub fn in_memory_locks(&self) -> InMemoryLockManager {
        InMemoryLockManager::new().with_enabled(self.orders.locking_enabled)
    }

    #[cfg(feature = "redis")]
    pub fn redis_locks(&self) -> anyhow::Result<Option<crate::lock::RedisLockManager>> {
        let Some(url) = self.redis_url.as_deref() else {
            return Ok(None);
        };
        let ttl = std::time::Duration::from_millis(self.lock_ttl_ms.unwrap_or(DEFAULT_LOCK_TTL_MS));
        crate::lock::RedisLockManager::new(url, ttl)
            .map(Some)
            .context("connecting the redis lock backend")
    }
}
