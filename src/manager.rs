//! Orchestration of the memory and remote layers.
//!
//! Reads check Memory then Remote; a remote hit back-fills memory using the
//! read-time memory TTL (not the value's original remote TTL — L1 stays
//! short-lived on promotion). Writes go to every requested layer in
//! parallel with no cross-layer rollback. Remote transport failures on the
//! read path degrade to a miss and surface only as `error` events; on
//! delete paths they propagate so event-driven invalidation can retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;

use crate::config::KeyStrategy;
use crate::entry::{CacheLayer, StoredValue};
use crate::error::CacheError;
use crate::events::{CacheEvent, CacheEventKind, EventSink};
use crate::stores::memory::ReadOutcome;
use crate::stores::{MemoryStore, RemoteStore};
use crate::utils::glob_to_regex;

/// Per-call options. Unset fields fall back to the key's strategy, then to
/// the manager defaults.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub layers: Option<Vec<CacheLayer>>,
    pub ttl: Option<Duration>,
    /// Bypass reads entirely; `get` reports a miss and `get_or_set`
    /// recomputes.
    pub force_refresh: bool,
}

impl CacheOptions {
    pub fn layers(mut self, layers: Vec<CacheLayer>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// Fallback TTLs for keys whose prefix maps to no strategy.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub memory_ttl: Duration,
    pub remote_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            memory_ttl: Duration::from_secs(60),
            remote_ttl: Duration::from_secs(600),
        }
    }
}

type KeyLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct CacheManager {
    memory: Arc<MemoryStore>,
    remote: Option<Arc<RemoteStore>>,
    strategies: Arc<KeyStrategy>,
    config: ManagerConfig,
    sink: Option<Arc<dyn EventSink>>,
    /// Per-key stampede locks serializing only the `get_or_set` factory.
    loading: KeyLocks,
}

impl CacheManager {
    pub fn new(
        memory: Arc<MemoryStore>,
        remote: Option<Arc<RemoteStore>>,
        strategies: Arc<KeyStrategy>,
    ) -> Self {
        CacheManager {
            memory,
            remote,
            strategies,
            config: ManagerConfig::default(),
            sink: None,
            loading: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an observability sink. Emission is fire-and-forget and never
    /// blocks a cache operation.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn enabled_for(&self, key: &str) -> bool {
        self.strategies
            .config_for_key(key)
            .map(|c| c.enabled)
            .unwrap_or(true)
    }

    fn effective_layers(&self, key: &str, opts: &CacheOptions) -> Vec<CacheLayer> {
        let layers = opts.layers.clone().unwrap_or_else(|| {
            self.strategies
                .config_for_key(key)
                .map(|c| c.layers.clone())
                .unwrap_or_else(|| vec![CacheLayer::Memory, CacheLayer::Remote])
        });
        layers
            .into_iter()
            .filter(|l| *l != CacheLayer::Origin)
            .collect()
    }

    fn memory_ttl(&self, key: &str, opts: &CacheOptions) -> Duration {
        opts.ttl.unwrap_or_else(|| {
            self.strategies
                .config_for_key(key)
                .map(|c| c.ttl.memory)
                .unwrap_or(self.config.memory_ttl)
        })
    }

    fn remote_ttl(&self, key: &str, opts: &CacheOptions) -> Duration {
        opts.ttl.unwrap_or_else(|| {
            self.strategies
                .config_for_key(key)
                .map(|c| c.ttl.remote)
                .unwrap_or(self.config.remote_ttl)
        })
    }

    /// Read through the requested layers in order Memory → Remote.
    ///
    /// A remote transport failure counts as a miss for that layer (with an
    /// `error` event); a deserialization failure propagates, since it means
    /// the caller's type does not match what was cached.
    pub async fn get<T>(&self, key: &str, opts: &CacheOptions) -> Result<Option<T>, CacheError>
    where
        T: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        if opts.force_refresh || !self.enabled_for(key) {
            return Ok(None);
        }

        let layers = self.effective_layers(key, opts);

        if layers.contains(&CacheLayer::Memory) {
            match self.memory.get(key).await {
                ReadOutcome::Hit(value) => {
                    let value = value.decode::<T>()?;
                    self.emit(CacheEvent::new(CacheEventKind::Hit, CacheLayer::Memory, key));
                    return Ok(Some(value));
                }
                ReadOutcome::Expired => {
                    self.emit(CacheEvent::new(
                        CacheEventKind::Expire,
                        CacheLayer::Memory,
                        key,
                    ));
                }
                ReadOutcome::Miss => {
                    self.emit(CacheEvent::new(
                        CacheEventKind::Miss,
                        CacheLayer::Memory,
                        key,
                    ));
                }
            }
        }

        if layers.contains(&CacheLayer::Remote) {
            if let Some(remote) = &self.remote {
                match remote.get(key).await {
                    Ok(Some(json)) => {
                        let value: T = serde_json::from_str(&json).map_err(|e| {
                            CacheError::Serialization(format!("decode failed: {}", e))
                        })?;
                        self.emit(CacheEvent::new(CacheEventKind::Hit, CacheLayer::Remote, key));
                        if layers.contains(&CacheLayer::Memory) {
                            self.fill_memory(key, StoredValue::typed(value.clone()), opts)
                                .await;
                        }
                        return Ok(Some(value));
                    }
                    Ok(None) => {
                        self.emit(CacheEvent::new(
                            CacheEventKind::Miss,
                            CacheLayer::Remote,
                            key,
                        ));
                    }
                    Err(e) => {
                        self.emit(
                            CacheEvent::new(CacheEventKind::Error, CacheLayer::Remote, key)
                                .with_metadata(e.to_string()),
                        );
                    }
                }
            }
        }

        Ok(None)
    }

    async fn fill_memory(&self, key: &str, value: StoredValue, opts: &CacheOptions) {
        let ttl = self.memory_ttl(key, opts);
        let outcome = self.memory.set(key, value, Some(ttl)).await;
        if let Some(evicted) = outcome.evicted {
            self.emit(CacheEvent::new(
                CacheEventKind::Evict,
                CacheLayer::Memory,
                evicted,
            ));
        }
        self.emit(CacheEvent::new(CacheEventKind::Set, CacheLayer::Memory, key));
    }

    /// Write to every requested layer in parallel.
    ///
    /// Layers are independent — a remote serialization failure propagates
    /// but never rolls back a completed memory write.
    pub async fn set<T>(&self, key: &str, value: &T, opts: &CacheOptions) -> Result<(), CacheError>
    where
        T: Clone + Serialize + Send + Sync + 'static,
    {
        if !self.enabled_for(key) {
            return Ok(());
        }

        let layers = self.effective_layers(key, opts);

        let memory_write = async {
            if layers.contains(&CacheLayer::Memory) {
                self.fill_memory(key, StoredValue::typed(value.clone()), opts)
                    .await;
            }
        };

        let remote_write = async {
            if !layers.contains(&CacheLayer::Remote) {
                return Ok(());
            }
            let Some(remote) = &self.remote else {
                return Ok(());
            };
            let json = serde_json::to_string(value)
                .map_err(|e| CacheError::Serialization(format!("encode failed: {}", e)))?;
            let ttl = self.remote_ttl(key, opts);
            match remote.set(key, &json, Some(ttl)).await {
                Ok(()) => {
                    self.emit(CacheEvent::new(CacheEventKind::Set, CacheLayer::Remote, key));
                    Ok(())
                }
                Err(e) => {
                    // Transport failure: the value still lives in memory.
                    self.emit(
                        CacheEvent::new(CacheEventKind::Error, CacheLayer::Remote, key)
                            .with_metadata(e.to_string()),
                    );
                    Ok(())
                }
            }
        };

        let ((), remote_result) = tokio::join!(memory_write, remote_write);
        remote_result
    }

    /// Delete from every requested layer. Returns whether any layer held
    /// the key. Remote transport failures propagate (after the memory
    /// delete has completed) so invalidation callers can retry.
    pub async fn delete(&self, key: &str, opts: &CacheOptions) -> Result<bool, CacheError> {
        let layers = self.effective_layers(key, opts);
        let mut deleted = false;

        if layers.contains(&CacheLayer::Memory) && self.memory.delete(key).await {
            self.emit(CacheEvent::new(
                CacheEventKind::Delete,
                CacheLayer::Memory,
                key,
            ));
            deleted = true;
        }

        if layers.contains(&CacheLayer::Remote) {
            if let Some(remote) = &self.remote {
                match remote.delete(key).await {
                    Ok(removed) => {
                        if removed {
                            self.emit(CacheEvent::new(
                                CacheEventKind::Delete,
                                CacheLayer::Remote,
                                key,
                            ));
                            deleted = true;
                        }
                    }
                    Err(e) => {
                        self.emit(
                            CacheEvent::new(CacheEventKind::Error, CacheLayer::Remote, key)
                                .with_metadata(e.to_string()),
                        );
                        return Err(e);
                    }
                }
            }
        }

        Ok(deleted)
    }

    /// Delete all keys matching a glob pattern (`*` matches any run of
    /// characters). Memory matches via regex translation; the remote store
    /// uses its native pattern delete. Returns the total number of keys
    /// removed across layers.
    pub async fn delete_pattern(&self, pattern: &str, opts: &CacheOptions) -> Result<u64, CacheError> {
        let layers = self.effective_layers(pattern, opts);
        let mut removed: u64 = 0;

        if layers.contains(&CacheLayer::Memory) {
            let regex = glob_to_regex(pattern)?;
            let keys = self.memory.delete_matching(&regex).await;
            if !keys.is_empty() {
                removed += keys.len() as u64;
                self.emit(
                    CacheEvent::new(CacheEventKind::Delete, CacheLayer::Memory, pattern)
                        .with_metadata(format!("{} keys", keys.len())),
                );
            }
        }

        if layers.contains(&CacheLayer::Remote) {
            if let Some(remote) = &self.remote {
                match remote.delete_pattern(pattern).await {
                    Ok(count) => {
                        if count > 0 {
                            removed += count;
                            self.emit(
                                CacheEvent::new(CacheEventKind::Delete, CacheLayer::Remote, pattern)
                                    .with_metadata(format!("{} keys", count)),
                            );
                        }
                    }
                    Err(e) => {
                        self.emit(
                            CacheEvent::new(CacheEventKind::Error, CacheLayer::Remote, pattern)
                                .with_metadata(e.to_string()),
                        );
                        return Err(e);
                    }
                }
            }
        }

        Ok(removed)
    }

    /// True if any requested layer reports presence (OR semantics, not
    /// strict consistency). Remote failures count as absent.
    pub async fn exists(&self, key: &str, opts: &CacheOptions) -> Result<bool, CacheError> {
        let layers = self.effective_layers(key, opts);

        if layers.contains(&CacheLayer::Memory) && self.memory.has(key).await {
            return Ok(true);
        }

        if layers.contains(&CacheLayer::Remote) {
            if let Some(remote) = &self.remote {
                match remote.exists(key).await {
                    Ok(present) => return Ok(present),
                    Err(e) => {
                        self.emit(
                            CacheEvent::new(CacheEventKind::Error, CacheLayer::Remote, key)
                                .with_metadata(e.to_string()),
                        );
                    }
                }
            }
        }

        Ok(false)
    }

    /// Read-through: return the cached value, or compute it via `factory`
    /// and write it to the requested layers.
    ///
    /// At most one factory invocation runs per key at a time within this
    /// process. Concurrent callers for the same key await the in-flight
    /// computation and then read its result from the cache instead of
    /// recomputing. The lock covers only the factory — unrelated `get`/
    /// `set` calls on the same key are not serialized.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        opts: &CacheOptions,
    ) -> Result<T, CacheError>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CacheError>>,
    {
        if !self.enabled_for(key) {
            return factory().await;
        }

        if let Some(value) = self.get::<T>(key, opts).await? {
            return Ok(value);
        }

        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;

            // The in-flight caller may have populated the cache while we
            // waited on the lock.
            match self.get::<T>(key, opts).await? {
                Some(value) => Ok(value),
                None => {
                    let value = factory().await?;
                    match self.set(key, &value, opts).await {
                        Ok(()) => {}
                        // A value that cannot be encoded is a data-contract
                        // violation, not a degraded layer.
                        Err(e @ CacheError::Serialization(_)) => return Err(e),
                        Err(e) => {
                            tracing::warn!(key, error = %e, "caching computed value failed");
                        }
                    }
                    Ok(value)
                }
            }
        };
        self.release_key_lock(key, lock);
        result
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.loading.lock().unwrap();
        locks.entry(key.to_string()).or_default().clone()
    }

    fn release_key_lock(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.loading.lock().unwrap();
        // Two handles means only the registry and us hold it: no waiters.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Drop every entry in the memory layer. The remote keyspace is shared
    /// across processes and is left alone; use `delete_pattern` for it.
    pub async fn clear(&self) -> u64 {
        let count = self.memory.clear().await as u64;
        self.emit(
            CacheEvent::new(CacheEventKind::Clear, CacheLayer::Memory, "*")
                .with_metadata(format!("{} keys", count)),
        );
        count
    }

    /// Sweep expired memory entries on a fixed interval, emitting an
    /// `expire` event per removed key. Runs until the handle is aborted.
    pub fn spawn_maintenance(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = manager.memory.cleanup().await;
                for key in removed {
                    manager.emit(CacheEvent::new(
                        CacheEventKind::Expire,
                        CacheLayer::Memory,
                        key,
                    ));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStoreConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BufferedSink {
        events: Mutex<Vec<CacheEvent>>,
    }

    impl BufferedSink {
        fn new() -> Self {
            BufferedSink {
                events: Mutex::new(Vec::new()),
            }
        }

        fn kinds(&self) -> Vec<CacheEventKind> {
            self.events.lock().unwrap().iter().map(|e| e.kind).collect()
        }
    }

    #[async_trait]
    impl EventSink for BufferedSink {
        fn emit(&self, event: CacheEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn memory_only_manager() -> CacheManager {
        CacheManager::new(
            Arc::new(MemoryStore::new(MemoryStoreConfig::default())),
            None,
            Arc::new(KeyStrategy::with_defaults()),
        )
    }

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let manager = memory_only_manager();
        let opts = CacheOptions::default();

        let missing: Option<String> = manager.get("user:1", &opts).await.unwrap();
        assert!(missing.is_none());

        manager
            .set("user:1", &"alice".to_string(), &opts)
            .await
            .unwrap();
        let found: Option<String> = manager.get("user:1", &opts).await.unwrap();
        assert_eq!(found, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_read() {
        let manager = memory_only_manager();
        manager
            .set("user:1", &"alice".to_string(), &CacheOptions::default())
            .await
            .unwrap();

        let opts = CacheOptions::default().force_refresh();
        let result: Option<String> = manager.get("user:1", &opts).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_events_emitted_on_miss_set_hit() {
        let sink = Arc::new(BufferedSink::new());
        let manager = memory_only_manager().with_sink(sink.clone());
        let opts = CacheOptions::default();

        let _: Option<String> = manager.get("user:1", &opts).await.unwrap();
        manager
            .set("user:1", &"alice".to_string(), &opts)
            .await
            .unwrap();
        let _: Option<String> = manager.get("user:1", &opts).await.unwrap();

        assert_eq!(
            sink.kinds(),
            vec![CacheEventKind::Miss, CacheEventKind::Set, CacheEventKind::Hit]
        );
    }

    #[tokio::test]
    async fn test_delete_pattern_memory() {
        let manager = memory_only_manager();
        let opts = CacheOptions::default();

        for key in ["work:1", "work:1:meta", "work:2", "user:1"] {
            manager.set(key, &1u32, &opts).await.unwrap();
        }

        let removed = manager.delete_pattern("work:1*", &opts).await.unwrap();
        assert_eq!(removed, 2);
        assert!(manager.exists("work:2", &opts).await.unwrap());
        assert!(manager.exists("user:1", &opts).await.unwrap());
        assert!(!manager.exists("work:1", &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_set_invokes_factory_once_per_key() {
        let manager = Arc::new(memory_only_manager());
        let calls = Arc::new(AtomicUsize::new(0));

        // Ten concurrent callers before the first factory resolves.
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let manager = manager.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .get_or_set(
                        "ranking:weekly",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(40)).await;
                            Ok::<_, CacheError>("computed".to_string())
                        },
                        &CacheOptions::default(),
                    )
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_factory_error_propagates_and_caches_nothing() {
        let manager = memory_only_manager();
        let opts = CacheOptions::default();

        let result: Result<String, _> = manager
            .get_or_set(
                "user:1",
                || async { Err(CacheError::Origin("db down".to_string())) },
                &opts,
            )
            .await;
        assert!(matches!(result, Err(CacheError::Origin(_))));
        assert!(!manager.exists("user:1", &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_set_propagates_unencodable_value() {
        use crate::config::RemoteConfig;
        use std::collections::HashMap;

        // Remote layer present so the write path must encode; the endpoint
        // itself refuses connections immediately.
        let remote = RemoteStore::new(RemoteConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_millis(200),
            ..RemoteConfig::default()
        })
        .unwrap();
        let manager = CacheManager::new(
            Arc::new(MemoryStore::new(crate::stores::MemoryStoreConfig::default())),
            Some(Arc::new(remote)),
            Arc::new(KeyStrategy::with_defaults()),
        );

        // Maps with non-string keys have no JSON encoding.
        let result: Result<HashMap<(u8, u8), u8>, _> = manager
            .get_or_set(
                "user:1",
                || async {
                    let mut m = HashMap::new();
                    m.insert((1, 2), 3u8);
                    Ok(m)
                },
                &CacheOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_typed_mismatch_is_serialization_error() {
        let manager = memory_only_manager();
        let opts = CacheOptions::default();
        manager.set("user:1", &42u64, &opts).await.unwrap();

        let result: Result<Option<String>, _> = manager.get("user:1", &opts).await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_maintenance_emits_expire_events() {
        let sink = Arc::new(BufferedSink::new());
        let manager = Arc::new(memory_only_manager().with_sink(sink.clone()));

        manager
            .set(
                "temp:x",
                &1u32,
                &CacheOptions::default().ttl(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        let handle = manager.spawn_maintenance(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(sink.kinds().contains(&CacheEventKind::Expire));
    }
}
