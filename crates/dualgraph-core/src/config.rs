//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables, then validated. Every section has defaults suitable for a
//! local Redis + Neo4j pair.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::routing::model::RoutingThresholds;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "dualgraph.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisConfig,
    pub stream: StreamConfig,
    pub graph: GraphConfig,
    pub sync: SyncConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Event log layout and consumer-group identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// One worker is started per key.
    pub keys: Vec<String>,
    pub group: String,
    pub consumer: String,
    /// Longest a read waits on an empty stream.
    pub block_ms: u64,
    pub batch_size: usize,
    pub dead_letter_suffix: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keys: vec!["dualgraph:events".to_string()],
            group: "dualgraph-sync".to_string(),
            consumer: "worker-1".to_string(),
            block_ms: 1_000,
            batch_size: 100,
            dead_letter_suffix: ":dead".to_string(),
        }
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    pub connect_timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
            database: "neo4j".to_string(),
            max_connections: 8,
            connect_timeout_secs: 10,
        }
    }
}

/// Bounded-attempt exponential backoff parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    /// Failed cycles for one event before it is dead-lettered.
    pub max_deliveries: u32,
    pub dedup_ttl_secs: u64,
    /// Pause after an empty batch or a stream error.
    pub idle_backoff_ms: u64,
    /// Consecutive failed reads after which the log is considered lost.
    pub max_stream_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_deliveries: 5,
            dedup_ttl_secs: 7 * 24 * 3600,
            idle_backoff_ms: 250,
            max_stream_failures: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    #[serde(flatten)]
    pub thresholds: RoutingThresholds,
    pub cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            thresholds: RoutingThresholds::default(),
            cache_capacity: 10_000,
        }
    }
}

impl Config {
    /// Load from `path`, or from `dualgraph.toml` in the working directory if
    /// present, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Reading configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override connection settings from `lookup` (normally the environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(uri) = lookup("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Some(user) = lookup("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.graph.password = password;
        }
        if let Some(keys) = lookup("DUALGRAPH_STREAM") {
            self.stream.keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(consumer) = lookup("DUALGRAPH_CONSUMER") {
            self.stream.consumer = consumer;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.url.trim().is_empty() {
            return Err(ConfigError::invalid("redis.url must not be empty"));
        }
        if self.stream.keys.is_empty() || self.stream.keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::invalid("stream.keys must list at least one non-empty key"));
        }
        if self.stream.group.trim().is_empty() || self.stream.consumer.trim().is_empty() {
            return Err(ConfigError::invalid("stream.group and stream.consumer must not be empty"));
        }
        if self.stream.batch_size == 0 {
            return Err(ConfigError::invalid("stream.batch_size must be greater than 0"));
        }
        if self.stream.dead_letter_suffix.is_empty() {
            return Err(ConfigError::invalid("stream.dead_letter_suffix must not be empty"));
        }
        if self.graph.max_connections == 0 {
            return Err(ConfigError::invalid("graph.max_connections must be greater than 0"));
        }
        self.sync.validate()?;
        self.router.thresholds.validate()?;
        if self.router.cache_capacity == 0 {
            return Err(ConfigError::invalid("router.cache_capacity must be greater than 0"));
        }
        Ok(())
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid("sync.retry.max_attempts must be at least 1"));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::invalid("sync.retry.multiplier must be >= 1.0"));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigError::invalid("sync.retry.max_delay_ms must be >= base_delay_ms"));
        }
        if self.max_deliveries == 0 {
            return Err(ConfigError::invalid("sync.max_deliveries must be at least 1"));
        }
        if self.max_stream_failures == 0 {
            return Err(ConfigError::invalid("sync.max_stream_failures must be at least 1"));
        }
        Ok(())
    }
}
