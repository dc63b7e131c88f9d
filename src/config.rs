use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::validation::ValidationConfig;

// ============================================================================
// Service Configuration
// ============================================================================
//
// Loaded once from YAML, then overridden from the environment. The resulting
// value is passed explicitly into every constructor that needs a setting.
//
// ============================================================================

pub const CONFIG_PATH_ENV: &str = "ORDER_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub env: Environment,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub http: HttpConfig,
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "orders".to_string(),
            max_connections: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Absent means cached orders never expire
    pub ttl_secs: Option<u64>,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            ttl_secs: None,
            key_prefix: "order:".to_string(),
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub brokers: String,
    pub topic: String,
    pub durable_name: String,
    /// Consumer slots; each holds at most one unacknowledged message
    pub max_in_flight: usize,
    pub drain_timeout_secs: u64,
    /// Pause before a message whose store write failed is handed back
    pub redelivery_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: "127.0.0.1:9092".to_string(),
            topic: "orders".to_string(),
            durable_name: "order-sync".to_string(),
            max_in_flight: 16,
            drain_timeout_secs: 30,
            redelivery_delay_ms: 1000,
        }
    }
}

impl BrokerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub workers: usize,
    pub page_size: usize,
    pub restore_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            page_size: 1000,
            restore_timeout_secs: 120,
        }
    }
}

impl CacheConfig {
    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            timeout_secs: 120,
            batch_size: 500,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Read the file named by `ORDER_SYNC_CONFIG` (or the default path),
    /// apply environment overrides and validate
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_yaml(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Overrides take precedence over the file; `lookup` is the environment
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = non_empty("DB_PORT").and_then(|v| v.parse().ok()) {
            self.database.port = v;
        }
        if let Some(v) = non_empty("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = non_empty("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = non_empty("DB_NAME") {
            self.database.dbname = v;
        }
        if let Some(v) = non_empty("REDIS_HOST") {
            self.redis.host = v;
        }
        if let Some(v) = non_empty("REDIS_PORT").and_then(|v| v.parse().ok()) {
            self.redis.port = v;
        }
        if let Some(v) = non_empty("BROKER_ADDR") {
            self.broker.brokers = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.cache.workers == 0 {
            return invalid("cache.workers must be greater than zero");
        }
        if self.cache.page_size == 0 {
            return invalid("cache.page_size must be greater than zero");
        }
        if self.sync.batch_size == 0 {
            return invalid("sync.batch_size must be greater than zero");
        }
        if self.sync.interval_secs == 0 {
            return invalid("sync.interval_secs must be greater than zero");
        }
        if self.sync.timeout_secs == 0 {
            return invalid("sync.timeout_secs must be greater than zero");
        }
        if self.broker.max_in_flight == 0 {
            return invalid("broker.max_in_flight must be greater than zero");
        }
        // An empty prefix turns the reconciliation pattern into "*"
        if self.redis.key_prefix.is_empty() {
            return invalid("redis.key_prefix must not be empty");
        }
        if self.broker.topic.is_empty() || self.broker.durable_name.is_empty() {
            return invalid("broker.topic and broker.durable_name are required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
env: prod
database:
  host: db.internal
  port: 6432
  user: orders
  password: secret
  dbname: orders
redis:
  host: cache.internal
  ttl_secs: 86400
broker:
  brokers: kafka:9092
  topic: l0
  durable_name: order-sync-1
sync:
  interval_secs: 60
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.env, Environment::Prod);
        assert_eq!(config.database.port, 6432);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.key_prefix, "order:");
        assert_eq!(config.redis.ttl(), Some(Duration::from_secs(86400)));
        assert_eq!(config.broker.topic, "l0");
        assert_eq!(config.broker.drain_timeout(), Duration::from_secs(30));
        assert_eq!(config.cache.workers, 5);
        assert_eq!(config.sync.interval(), Duration::from_secs(60));
        assert_eq!(config.sync.batch_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("DB_HOST", "override-db"),
            ("DB_PORT", "5433"),
            ("REDIS_HOST", ""),
            ("BROKER_ADDR", "redpanda:9092"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.host, "override-db");
        assert_eq!(config.database.port, 5433);
        // Empty values do not override
        assert_eq!(config.redis.host, "cache.internal");
        assert_eq!(config.broker.brokers, "redpanda:9092");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.cache.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_key_prefix_rejected() {
        let mut config = Config::default();
        config.redis.key_prefix = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");

        redis.password = Some("pw".to_string());
        assert_eq!(redis.url(), "redis://:pw@127.0.0.1:6379/0");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load_from("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
