//! Per-domain cache configuration and remote-store connection settings.
//!
//! Configuration is immutable after process start: [`KeyStrategy::new`]
//! validates every strategy up front so that a misconfigured domain fails
//! at startup rather than at request time.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::entry::CacheLayer;
use crate::error::CacheError;
use crate::key::KeyPrefix;

/// Connection settings for the remote (Redis-compatible) store.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Treat the endpoint as a Redis Cluster node. Only single-node
    /// connections are wired; enabling this fails at store construction
    /// rather than silently connecting to one shard.
    pub cluster: bool,
    /// Discover the master through Sentinel under this service name.
    /// Only single-node connections are wired; setting this fails at
    /// store construction.
    pub sentinel_master: Option<String>,
    /// Budget for establishing a connection.
    pub connect_timeout: Duration,
    /// Budget for a single command round trip.
    pub read_timeout: Duration,
    /// Transparent same-request retries on transient I/O failure.
    pub max_retries_per_request: u32,
    /// Reconnection attempts before the store reports a persistent
    /// unavailable status and stops retrying on its own.
    pub max_reconnect_attempts: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            cluster: false,
            sentinel_master: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            max_retries_per_request: 1,
            max_reconnect_attempts: 5,
        }
    }
}

impl RemoteConfig {
    /// Load connection settings from `REDIS_HOST`, `REDIS_PORT`,
    /// `REDIS_PASSWORD`, `REDIS_DB`, `REDIS_CLUSTER` and
    /// `REDIS_SENTINEL_MASTER`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        RemoteConfig {
            host: env::var("REDIS_HOST").unwrap_or(defaults.host),
            port: env::var("REDIS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
            db: env::var("REDIS_DB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.db),
            cluster: env::var("REDIS_CLUSTER")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.cluster),
            sentinel_master: env::var("REDIS_SENTINEL_MASTER")
                .ok()
                .filter(|s| !s.is_empty()),
            ..defaults
        }
    }

    /// Connection URL in the form `redis://[:password@]host:port/db`.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// How entries of a strategy get invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationMode {
    /// Entries age out on their own.
    Ttl,
    /// Explicit `delete`/`delete_pattern` calls only.
    Manual,
    /// Driven by [`crate::SyncEvent`]s through the sync manager.
    EventDriven,
}

#[derive(Debug, Clone)]
pub struct InvalidationConfig {
    pub mode: InvalidationMode,
    /// Domain event names this strategy listens to (event-driven mode).
    pub events: Vec<String>,
}

impl InvalidationConfig {
    pub fn ttl() -> Self {
        InvalidationConfig {
            mode: InvalidationMode::Ttl,
            events: Vec::new(),
        }
    }

    pub fn manual() -> Self {
        InvalidationConfig {
            mode: InvalidationMode::Manual,
            events: Vec::new(),
        }
    }

    pub fn event_driven(events: &[&str]) -> Self {
        InvalidationConfig {
            mode: InvalidationMode::EventDriven,
            events: events.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Per-layer TTLs for one strategy.
#[derive(Debug, Clone, Copy)]
pub struct TtlConfig {
    pub memory: Duration,
    pub remote: Duration,
}

/// Per-layer size bounds for one strategy.
#[derive(Debug, Clone, Copy)]
pub struct SizeConfig {
    pub memory: usize,
    pub remote: usize,
}

/// Cache behavior for one named domain strategy.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub layers: Vec<CacheLayer>,
    pub ttl: TtlConfig,
    pub max_size: SizeConfig,
    pub invalidation: InvalidationConfig,
}

impl CacheConfig {
    fn validate(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        if self.layers.is_empty() {
            return Err(CacheError::Config("no layers configured".to_string()));
        }
        if self.layers.contains(&CacheLayer::Memory) {
            if self.ttl.memory.is_zero() {
                return Err(CacheError::Config("memory ttl must be non-zero".to_string()));
            }
            if self.max_size.memory == 0 {
                return Err(CacheError::Config(
                    "memory max size must be non-zero".to_string(),
                ));
            }
        }
        if self.layers.contains(&CacheLayer::Remote) && self.ttl.remote.is_zero() {
            return Err(CacheError::Config("remote ttl must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn strategy(
    memory_secs: u64,
    remote_secs: u64,
    memory_size: usize,
    remote_size: usize,
    invalidation: InvalidationConfig,
) -> CacheConfig {
    CacheConfig {
        enabled: true,
        layers: vec![CacheLayer::Memory, CacheLayer::Remote, CacheLayer::Origin],
        ttl: TtlConfig {
            memory: Duration::from_secs(memory_secs),
            remote: Duration::from_secs(remote_secs),
        },
        max_size: SizeConfig {
            memory: memory_size,
            remote: remote_size,
        },
        invalidation,
    }
}

/// Registry of named domain strategies.
///
/// Looked up by [`crate::CacheManager`] to resolve default TTLs and layer
/// sets from a key's prefix, and by callers wiring invalidation.
#[derive(Debug, Clone)]
pub struct KeyStrategy {
    strategies: HashMap<String, CacheConfig>,
}

impl KeyStrategy {
    /// Build a registry, validating every strategy up front.
    pub fn new(strategies: HashMap<String, CacheConfig>) -> Result<Self, CacheError> {
        for (name, config) in &strategies {
            if name.is_empty() {
                return Err(CacheError::Config("empty strategy name".to_string()));
            }
            config
                .validate()
                .map_err(|e| CacheError::Config(format!("strategy '{}': {}", name, e)))?;
        }
        Ok(KeyStrategy { strategies })
    }

    /// The standard strategy set for the backend's domains.
    pub fn with_defaults() -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(
            "user".to_string(),
            strategy(300, 3600, 1000, 50_000, InvalidationConfig::ttl()),
        );
        strategies.insert(
            "work".to_string(),
            strategy(
                300,
                7200,
                2000,
                100_000,
                InvalidationConfig::event_driven(&["work.updated"]),
            ),
        );
        strategies.insert(
            "ranking".to_string(),
            strategy(
                60,
                600,
                200,
                5_000,
                InvalidationConfig::event_driven(&["ranking.changed"]),
            ),
        );
        strategies.insert(
            "graph".to_string(),
            strategy(
                600,
                86_400,
                5000,
                500_000,
                InvalidationConfig::event_driven(&["graph.changed"]),
            ),
        );
        strategies.insert(
            "session".to_string(),
            strategy(60, 1800, 5000, 200_000, InvalidationConfig::manual()),
        );
        strategies.insert(
            "api".to_string(),
            strategy(30, 300, 1000, 20_000, InvalidationConfig::ttl()),
        );
        // Defaults are static and well-formed.
        KeyStrategy::new(strategies).expect("default strategies are valid")
    }

    /// Look up a strategy by name. Unknown names are a configuration error.
    pub fn strategy(&self, name: &str) -> Result<&CacheConfig, CacheError> {
        self.strategies
            .get(name)
            .ok_or_else(|| CacheError::Config(format!("unknown cache strategy '{}'", name)))
    }

    pub fn strategy_names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(|s| s.as_str())
    }

    /// The strategy name a key prefix maps to, if any.
    ///
    /// `temp` keys are scratch space and carry no strategy.
    pub fn strategy_name_for_prefix(prefix: KeyPrefix) -> Option<&'static str> {
        match prefix {
            KeyPrefix::User => Some("user"),
            KeyPrefix::Work => Some("work"),
            KeyPrefix::Ranking => Some("ranking"),
            KeyPrefix::Kg => Some("graph"),
            KeyPrefix::Session => Some("session"),
            KeyPrefix::Api => Some("api"),
            KeyPrefix::Temp => None,
        }
    }

    /// Resolve the strategy governing a raw cache key, if its prefix maps
    /// to one.
    pub fn config_for_key(&self, key: &str) -> Option<&CacheConfig> {
        let prefix: KeyPrefix = key.split(':').next()?.parse().ok()?;
        let name = Self::strategy_name_for_prefix(prefix)?;
        self.strategies.get(name)
    }
}
