// ============================================================================
// Cache Gateway
// ============================================================================
//
// The cache holds a disposable JSON copy of each order. The store stays the
// system of record; anything missing here is refilled by the read path or
// the next reconciliation run.
//
// Every call site builds keys through `CacheKeys`, so warm-up, ingestion,
// reconciliation and reads all agree on one key per order.
//
// ============================================================================

mod redis_cache;

pub use redis_cache::RedisOrderCache;

use async_trait::async_trait;

use crate::error::CacheError;
use crate::models::Order;
use crate::utils::{CircuitState, RunScope};

pub const DEFAULT_KEY_PREFIX: &str = "order:";

#[async_trait]
pub trait OrderCache: Send + Sync + 'static {
    /// Serialize and store; failures are returned, never retried here
    async fn set(&self, key: &str, order: &Order) -> Result<(), CacheError>;

    /// `CacheError::NotFound` when the key is absent
    async fn get(&self, key: &str) -> Result<Order, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob pattern. Per-key failures are logged
    /// and skipped; a failing scan aborts. Returns the number of keys removed.
    async fn delete_by_pattern(&self, scope: &RunScope, pattern: &str) -> Result<usize, CacheError>;

    async fn circuit_state(&self) -> CircuitState {
        CircuitState::Closed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn order_key(&self, order_uid: &str) -> String {
        format!("{}{}", self.prefix, order_uid)
    }

    /// Glob matching every order key and nothing else
    pub fn pattern(&self) -> String {
        format!("{}*", self.prefix)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
