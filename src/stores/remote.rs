//! L2: client for a Redis-compatible remote key-value store.
//!
//! Connects lazily on first use and tracks real connectivity: `is_ready()`
//! is false until a connection has been established and after a transport
//! failure. Operations raise [`CacheError::NotReady`] while disconnected;
//! falling back is the caller's (the manager's) job, not this layer's.
//! Reconnection attempts are bounded — past `max_reconnect_attempts` the
//! store reports a persistent unavailable status instead of retrying
//! forever.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::config::RemoteConfig;
use crate::error::CacheError;

pub struct RemoteStore {
    client: redis::Client,
    config: RemoteConfig,
    connection: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl RemoteStore {
    /// Create the store without connecting; the first operation connects.
    ///
    /// Only single-node deployments are wired. The cluster and sentinel
    /// toggles are honored by rejecting them here, so a deployment that
    /// needs them fails at startup instead of quietly talking to one node.
    pub fn new(config: RemoteConfig) -> Result<Self, CacheError> {
        if config.cluster {
            return Err(CacheError::Config(
                "cluster mode is not supported; configure a single node".to_string(),
            ));
        }
        if let Some(master) = &config.sentinel_master {
            return Err(CacheError::Config(format!(
                "sentinel discovery (master '{}') is not supported; configure a single node",
                master
            )));
        }
        let client = redis::Client::open(config.url().as_str())
            .map_err(|e| CacheError::Config(format!("invalid remote store config: {}", e)))?;
        Ok(RemoteStore {
            client,
            config,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        })
    }

    /// True connectivity, not merely "client object exists".
    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if self.connected.load(Ordering::Relaxed) {
            let guard = self.connection.read().await;
            if let Some(connection) = guard.as_ref() {
                return Ok(connection.clone());
            }
        }

        if self.reconnect_attempts.load(Ordering::Relaxed) >= self.config.max_reconnect_attempts {
            return Err(CacheError::NotReady(
                "reconnect budget exhausted; remote store unavailable".to_string(),
            ));
        }

        let mut guard = self.connection.write().await;
        // Another task may have connected while we waited for the lock.
        if self.connected.load(Ordering::Relaxed) {
            if let Some(connection) = guard.as_ref() {
                return Ok(connection.clone());
            }
        }

        match tokio::time::timeout(
            self.config.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(connection)) => {
                *guard = Some(connection.clone());
                self.connected.store(true, Ordering::Relaxed);
                self.reconnect_attempts.store(0, Ordering::Relaxed);
                tracing::debug!(host = %self.config.host, port = self.config.port, "remote store connected");
                Ok(connection)
            }
            Ok(Err(e)) => {
                self.mark_disconnected();
                Err(CacheError::NotReady(format!("connect failed: {}", e)))
            }
            Err(_) => {
                self.mark_disconnected();
                Err(CacheError::NotReady("connect timed out".to_string()))
            }
        }
    }

    /// Run one command with the read timeout, retrying transient transport
    /// failures up to `max_retries_per_request` times on a fresh connection.
    async fn run<T, F, Fut>(&self, op: &str, key: &str, mut command: F) -> Result<T, CacheError>
    where
        F: FnMut(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let connection = self.connection().await?;
            match tokio::time::timeout(self.config.read_timeout, command(connection)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    let transient = e.is_io_error() || e.is_connection_dropped();
                    if transient {
                        self.mark_disconnected();
                    }
                    if !transient || attempt >= self.config.max_retries_per_request {
                        return Err(CacheError::operation(
                            "remote",
                            key,
                            format!("{} failed: {}", op, e),
                        ));
                    }
                }
                Err(_) => {
                    self.mark_disconnected();
                    if attempt >= self.config.max_retries_per_request {
                        return Err(CacheError::operation(
                            "remote",
                            key,
                            format!("{} timed out", op),
                        ));
                    }
                }
            }
            attempt += 1;
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key_owned = key.to_string();
        self.run("GET", key, move |mut connection| {
            let key = key_owned.clone();
            async move { connection.get::<_, Option<String>>(key).await }
        })
        .await
    }

    /// Store a value, with an expiry when `ttl` is given.
    ///
    /// Expiry is applied with millisecond precision so sub-second TTLs
    /// behave the same as in the memory layer.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let key_owned = key.to_string();
        let value_owned = value.to_string();
        let ttl_ms = ttl.map(|t| (t.as_millis() as u64).max(1));
        self.run("SET", key, move |mut connection| {
            let key = key_owned.clone();
            let value = value_owned.clone();
            async move {
                match ttl_ms {
                    Some(ms) => connection.pset_ex::<_, _, ()>(key, value, ms).await,
                    None => connection.set::<_, _, ()>(key, value).await,
                }
            }
        })
        .await
    }

    /// Remove the key. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key_owned = key.to_string();
        let removed: u64 = self
            .run("DEL", key, move |mut connection| {
                let key = key_owned.clone();
                async move { connection.del::<_, u64>(key).await }
            })
            .await?;
        Ok(removed > 0)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let key_owned = key.to_string();
        self.run("EXISTS", key, move |mut connection| {
            let key = key_owned.clone();
            async move { connection.exists::<_, bool>(key).await }
        })
        .await
    }

    /// Reset the key's expiry. Returns false if the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let key_owned = key.to_string();
        let secs = ttl.as_secs().max(1) as i64;
        self.run("EXPIRE", key, move |mut connection| {
            let key = key_owned.clone();
            async move { connection.expire::<_, bool>(key, secs).await }
        })
        .await
    }

    /// Remaining time to live. `None` for a missing key or one with no
    /// expiry set.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let key_owned = key.to_string();
        let secs: i64 = self
            .run("TTL", key, move |mut connection| {
                let key = key_owned.clone();
                async move { connection.ttl::<_, i64>(key).await }
            })
            .await?;
        if secs < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(secs as u64)))
    }

    /// Resolve keys matching a glob pattern via cursor-based SCAN.
    ///
    /// Known limitation: this walks the whole keyspace and is not suited
    /// to production-scale key counts without key-space partitioning.
    pub async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let pattern_owned = pattern.to_string();
            let (next, batch): (u64, Vec<String>) = self
                .run("SCAN", pattern, move |mut connection| {
                    let pattern = pattern_owned.clone();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(pattern)
                            .arg("COUNT")
                            .arg(100)
                            .query_async(&mut connection)
                            .await
                    }
                })
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                return Ok(keys);
            }
        }
    }

    /// Bulk delete. Returns how many keys were removed.
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys_owned = keys.to_vec();
        self.run("DEL", &keys.join(","), move |mut connection| {
            let keys = keys_owned.clone();
            async move { connection.del::<_, u64>(keys).await }
        })
        .await
    }

    /// Resolve matching keys, then bulk-delete them. Returns the count
    /// of keys removed.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let keys = self.keys_matching(pattern).await?;
        self.delete_many(&keys).await
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let key_owned = key.to_string();
        self.run("INCRBY", key, move |mut connection| {
            let key = key_owned.clone();
            async move { connection.incr::<_, _, i64>(key, delta).await }
        })
        .await
    }

    pub async fn decr(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let key_owned = key.to_string();
        self.run("DECRBY", key, move |mut connection| {
            let key = key_owned.clone();
            async move { connection.decr::<_, _, i64>(key, delta).await }
        })
        .await
    }

    pub async fn ping(&self) -> Result<bool, CacheError> {
        let pong: String = self
            .run("PING", "", move |mut connection| async move {
                redis::cmd("PING").query_async(&mut connection).await
            })
            .await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests against a live server require a running Redis instance and are
    // ignored by default; connectivity-failure tests run anywhere.

    fn unreachable_config() -> RemoteConfig {
        RemoteConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(200),
            max_retries_per_request: 0,
            max_reconnect_attempts: 2,
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn test_cluster_and_sentinel_toggles_are_rejected_at_construction() {
        let cluster = RemoteConfig {
            cluster: true,
            ..RemoteConfig::default()
        };
        assert!(matches!(
            RemoteStore::new(cluster),
            Err(CacheError::Config(_))
        ));

        let sentinel = RemoteConfig {
            sentinel_master: Some("mymaster".to_string()),
            ..RemoteConfig::default()
        };
        assert!(matches!(
            RemoteStore::new(sentinel),
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_not_ready_until_connected() {
        let store = RemoteStore::new(unreachable_config()).unwrap();
        assert!(!store.is_ready());

        let result = store.get("user:1").await;
        assert!(matches!(result, Err(CacheError::NotReady(_))));
        assert!(!store.is_ready());
    }

    #[tokio::test]
    async fn test_reconnect_budget_exhausts_to_persistent_unavailable() {
        let store = RemoteStore::new(unreachable_config()).unwrap();

        // Two real attempts allowed, then the budget check short-circuits.
        let _ = store.get("k").await;
        let _ = store.get("k").await;

        let result = store.ping().await;
        match result {
            Err(CacheError::NotReady(message)) => {
                assert!(message.contains("budget exhausted"), "got: {}", message)
            }
            other => panic!("expected NotReady, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    #[ignore = "requires running Redis instance"]
    async fn test_redis_round_trip() {
        let store = RemoteStore::new(RemoteConfig::from_env()).unwrap();

        let key = format!("temp:remote_test_{}", crate::utils::now_ms());
        store
            .set(&key, "\"value\"", Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(store.is_ready());
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("\"value\""));

        let remaining = store.ttl(&key).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(30));

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires running Redis instance"]
    async fn test_redis_subsecond_ttl_expires() {
        let store = RemoteStore::new(RemoteConfig::from_env()).unwrap();

        let key = format!("temp:ttl_test_{}", crate::utils::now_ms());
        store
            .set(&key, "1", Some(Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(store.exists(&key).await.unwrap());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires running Redis instance"]
    async fn test_redis_pattern_delete_and_counters() {
        let store = RemoteStore::new(RemoteConfig::from_env()).unwrap();
        let marker = crate::utils::now_ms();

        for suffix in ["a", "b", "c"] {
            let key = format!("temp:pat_{}:{}", marker, suffix);
            store.set(&key, "1", Some(Duration::from_secs(30))).await.unwrap();
        }

        let pattern = format!("temp:pat_{}:*", marker);
        let keys = store.keys_matching(&pattern).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(store.delete_pattern(&pattern).await.unwrap(), 3);

        let counter = format!("temp:ctr_{}", marker);
        assert_eq!(store.incr(&counter, 5).await.unwrap(), 5);
        assert_eq!(store.decr(&counter, 2).await.unwrap(), 3);
        store.delete(&counter).await.unwrap();

        assert!(store.ping().await.unwrap());
    }
}
