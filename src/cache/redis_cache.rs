use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::CacheError;
use crate::models::Order;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RunScope};
use super::OrderCache;

const SCAN_COUNT: usize = 250;

pub struct RedisOrderCache {
    connection: MultiplexedConnection,
    ttl: Option<Duration>,
    circuit_breaker: CircuitBreaker,
}

impl RedisOrderCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url())?;
        let mut connection = client.get_multiplexed_async_connection().await?;

        redis::cmd("PING").query_async::<String>(&mut connection).await?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            ttl_secs = ?config.ttl_secs,
            "Connected to Redis"
        );

        Ok(Self {
            connection,
            ttl: config.ttl(),
            circuit_breaker: CircuitBreaker::new("redis", CircuitBreakerConfig::default()),
        })
    }

    /// Run one Redis round-trip behind the circuit breaker
    async fn guarded<T, F>(&self, operation: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match self.circuit_breaker.call(operation).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::CircuitOpen) => Err(CacheError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(CacheError::Redis(e)),
        }
    }
}

/// Delete `keys` one at a time, each bounded by `scope`. A key that fails is
/// logged and skipped; running out of scope stops the whole page.
async fn delete_keys<F, Fut>(scope: &RunScope, keys: Vec<String>, mut delete: F) -> Result<usize, CacheError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<usize, CacheError>>,
{
    let mut deleted = 0usize;

    for key in keys {
        match scope.run(delete(key.clone())).await? {
            Ok(removed) => deleted += removed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to delete cache key, continuing");
            }
        }
    }

    Ok(deleted)
}

#[async_trait]
impl OrderCache for RedisOrderCache {
    async fn set(&self, key: &str, order: &Order) -> Result<(), CacheError> {
        let payload = serde_json::to_string(order)?;
        let mut conn = self.connection.clone();

        match self.ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.guarded(conn.set_ex::<_, _, ()>(key, payload, secs)).await
            }
            None => self.guarded(conn.set::<_, _, ()>(key, payload)).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Order, CacheError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = self.guarded(conn.get(key)).await?;

        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        self.guarded(conn.del::<_, ()>(key)).await
    }

    async fn delete_by_pattern(&self, scope: &RunScope, pattern: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;

        loop {
            scope.check()?;

            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT);
            let (next_cursor, keys) = scope
                .run(self.guarded(scan.query_async::<(u64, Vec<String>)>(&mut conn)))
                .await??;

            deleted += delete_keys(scope, keys, |key| {
                let mut conn = self.connection.clone();
                self.guarded(async move { conn.del::<_, usize>(key).await })
            })
            .await?;

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        tracing::debug!(pattern = %pattern, deleted = deleted, "Deleted cache keys by pattern");
        Ok(deleted)
    }

    async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}
