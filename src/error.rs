// ============================================================================
// Error Taxonomy
// ============================================================================
//
// One enum per gateway seam. Not-found is always its own variant so callers
// can branch on it without inspecting messages.
//
// ============================================================================

/// Why a bounded operation stopped before finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to decode stored items: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("empty page at offset {offset} while {total} rows were counted")]
    InconsistentPage { offset: i64, total: i64 },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl crate::utils::IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache key {0} not found")]
    NotFound(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to (de)serialize cached order: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache circuit breaker is open")]
    CircuitOpen,

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

impl crate::utils::IsTransient for CacheError {
    fn is_transient(&self) -> bool {
        match self {
            CacheError::Redis(e) => e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            CacheError::CircuitOpen => true,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("subscription closed")]
    Closed,

    #[error("acknowledgement failed: {0}")]
    Ack(String),
}

/// Failure of a warm-up or reconciliation run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Interrupted(Interrupted),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("failed to cache order under key {key}: {source}")]
    Cache {
        key: String,
        #[source]
        source: CacheError,
    },
}

impl SyncError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SyncError::Interrupted(_))
    }
}

impl From<Interrupted> for SyncError {
    fn from(reason: Interrupted) -> Self {
        SyncError::Interrupted(reason)
    }
}

// Interruptions surfaced by the batch scan stay interruptions
impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Interrupted(reason) => SyncError::Interrupted(reason),
            other => SyncError::Store(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
