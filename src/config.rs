//! Configuration loading from TOML files and environment variables
//!
//! Every section falls back to its defaults when omitted. The Redis
//! connection settings may be overridden from the environment:
//! - `PROXY_POOL_REDIS_URL` - backend URL
//! - `PROXY_POOL_REDIS_KEY` - namespace key of the proxy hash

use crate::error::PoolError;
use crate::manager::{IngestConfig, SweeperConfig};
use crate::proxy::{CheckerConfig, ProxySource};
use crate::store::PoolConfig;
use crate::Result;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable overriding `redis.url`
pub const ENV_REDIS_URL: &str = "PROXY_POOL_REDIS_URL";

/// Environment variable overriding `redis.key`
pub const ENV_REDIS_KEY: &str = "PROXY_POOL_REDIS_KEY";

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_KEY: &str = "proxy_pool";
const DEFAULT_COLLECTOR_TIMEOUT_SECS: u64 = 30;

/// Where the proxy hash lives
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace key of the hash holding every record
    pub key: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key: DEFAULT_REDIS_KEY.to_string(),
        }
    }
}

/// Proxy list sources fetched on every collection round
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    pub sources: Vec<ProxySource>,
    /// Per-request timeout when fetching a source, in seconds
    pub timeout_secs: u64,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            sources: ProxySource::common_sources(),
            timeout_secs: DEFAULT_COLLECTOR_TIMEOUT_SECS,
        }
    }
}

impl CollectorsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisConfig,
    pub pool: PoolConfig,
    pub validator: CheckerConfig,
    pub ingest: IngestConfig,
    pub sweeper: SweeperConfig,
    pub collectors: CollectorsConfig,
}

impl Config {
    /// Load from `path` when given, else start from defaults, then apply
    /// environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides looked up by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_REDIS_URL) {
            info!("Using Redis URL from {}", ENV_REDIS_URL);
            self.redis.url = url;
        }
        if let Some(key) = lookup(ENV_REDIS_KEY) {
            info!("Using Redis key from {}", ENV_REDIS_KEY);
            self.redis.key = key;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), PoolError> {
        if self.redis.key.is_empty() {
            return Err(PoolError::Config("redis key must not be empty".to_string()));
        }
        if self.pool.max_size == 0 {
            return Err(PoolError::Config("pool max_size must be at least 1".to_string()));
        }
        if self.validator.test_url.is_empty() {
            return Err(PoolError::Config("validator test_url must not be empty".to_string()));
        }
        if self.sweeper.concurrency == 0 {
            return Err(PoolError::Config("sweeper concurrency must be at least 1".to_string()));
        }
        self.ingest.validate()
    }
}
