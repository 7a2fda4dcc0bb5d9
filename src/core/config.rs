//! Client Configuration
//!
//! Connection target, pool sizing, default deadline and cursor batch size.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{DbError, DbResult};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Store URI (default: "mongodb://localhost:27017")
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database name (default: "doclite")
    #[serde(default = "default_database")]
    pub database: String,

    /// Connection pool settings, applied to each mode's pool
    #[serde(default)]
    pub pool: PoolConfig,

    /// Default deadline for every operation (None = unbounded)
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Documents fetched per cursor round-trip (default: 101)
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum live connections per mode (default: 10)
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// How long to wait for a free connection (default: 5000)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_database() -> String {
    "doclite".to_string()
}

fn default_batch_size() -> u32 {
    101
}

fn default_max_size() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Acquire timeout as a duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: default_database(),
            pool: PoolConfig::default(),
            deadline_ms: None,
            batch_size: default_batch_size(),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given database with defaults elsewhere
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    /// Parse from a JSON document; missing keys take their defaults
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DbError::validation("config", "client config JSON", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::validation(path.display().to_string(), "readable config file", e.to_string())
        })?;
        Self::from_json_str(&raw)
    }

    /// Overlay MONGO_URI, MONGO_DB, MONGO_POOL_SIZE and MONGO_TIMEOUT_MS
    /// onto the defaults
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(uri) = lookup("MONGO_URI") {
            config.uri = uri;
        }
        if let Some(database) = lookup("MONGO_DB") {
            config.database = database;
        }
        if let Some(size) = lookup("MONGO_POOL_SIZE") {
            config.pool.max_size = size.parse().map_err(|_| {
                DbError::validation("MONGO_POOL_SIZE", "positive integer", size.clone())
            })?;
        }
        if let Some(timeout) = lookup("MONGO_TIMEOUT_MS") {
            let ms = timeout.parse().map_err(|_| {
                DbError::validation("MONGO_TIMEOUT_MS", "integer milliseconds", timeout.clone())
            })?;
            config.deadline_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pools cannot honor
    pub fn validate(&self) -> DbResult<()> {
        if self.pool.max_size == 0 {
            return Err(DbError::validation("pool.max_size", "at least 1", "0"));
        }
        if self.batch_size == 0 {
            return Err(DbError::validation("batch_size", "at least 1", "0"));
        }
        if self.database.is_empty() {
            return Err(DbError::validation("database", "non-empty name", "\"\""));
        }
        Ok(())
    }

    /// Default deadline as a duration
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}
