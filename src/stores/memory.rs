//! L1: bounded in-process store with TTL and LRU eviction.
//!
//! The store is purely in-memory with no external side effects. It does not
//! emit events itself; operations return what happened (expired, evicted,
//! removed keys) so the manager can emit them.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use tokio::sync::RwLock;

use crate::entry::{CacheEntry, StoredValue};
use crate::utils::now_ms;

#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum number of entries; inserting past this evicts exactly one.
    pub max_size: usize,
    /// TTL applied when a `set` does not specify one.
    pub default_ttl: Duration,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        MemoryStoreConfig {
            max_size: 1000,
            default_ttl: Duration::from_secs(60),
        }
    }
}

/// What a read found.
pub enum ReadOutcome {
    Hit(StoredValue),
    /// The key existed but had aged out; it was removed on access.
    Expired,
    Miss,
}

/// What a write did beyond storing.
pub struct SetOutcome {
    /// Key removed by LRU eviction to make room, if any.
    pub evicted: Option<String>,
}

/// Thread-safe in-memory cache store using HashMap with RwLock.
///
/// Eviction is an O(n) scan over a bounded map: the victim is the entry
/// with the lowest `access_count`, oldest `stored_at` on ties.
pub struct MemoryStore {
    state: RwLock<HashMap<String, CacheEntry>>,
    max_size: usize,
    default_ttl: Duration,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        MemoryStore {
            state: RwLock::new(HashMap::new()),
            max_size: config.max_size,
            default_ttl: config.default_ttl,
        }
    }

    /// Return the cached value, bumping the entry's access count and
    /// recency. Expired entries are removed lazily here.
    pub async fn get(&self, key: &str) -> ReadOutcome {
        let mut state = self.state.write().await;
        let now = now_ms();

        let Some(entry) = state.get_mut(key) else {
            return ReadOutcome::Miss;
        };

        if entry.is_expired(now) {
            state.remove(key);
            return ReadOutcome::Expired;
        }

        entry.touch(now);
        ReadOutcome::Hit(entry.value.clone())
    }

    /// Insert or overwrite. When the store is full and the key is new,
    /// evict one entry first.
    pub async fn set(&self, key: &str, value: StoredValue, ttl: Option<Duration>) -> SetOutcome {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut state = self.state.write().await;

        let evicted = if !state.contains_key(key) && state.len() >= self.max_size {
            let victim = Self::select_victim(&state);
            if let Some(victim) = &victim {
                state.remove(victim);
            }
            victim
        } else {
            None
        };

        state.insert(key.to_string(), CacheEntry::new(value, ttl));
        SetOutcome { evicted }
    }

    /// Lowest access count wins; ties go to the oldest `stored_at`.
    fn select_victim(state: &HashMap<String, CacheEntry>) -> Option<String> {
        state
            .iter()
            .min_by_key(|(_, entry)| (entry.access_count, entry.stored_at))
            .map(|(key, _)| key.clone())
    }

    /// Remove the key. Returns whether it was present.
    pub async fn delete(&self, key: &str) -> bool {
        self.state.write().await.remove(key).is_some()
    }

    /// Non-expired presence check; does not bump access counts.
    pub async fn has(&self, key: &str) -> bool {
        let state = self.state.read().await;
        match state.get(key) {
            Some(entry) => !entry.is_expired(now_ms()),
            None => false,
        }
    }

    /// Sweep all expired entries, returning the removed keys.
    ///
    /// Run on a periodic timer independent of get/set traffic; lazy
    /// expiry on access covers the window between sweeps.
    pub async fn cleanup(&self) -> Vec<String> {
        let mut state = self.state.write().await;
        let now = now_ms();
        let expired: Vec<String> = state
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired
    }

    /// Keys whose names match the given pattern regex.
    pub async fn keys_matching(&self, pattern: &Regex) -> Vec<String> {
        let state = self.state.read().await;
        state
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect()
    }

    /// Remove all keys matching the pattern regex, returning them.
    pub async fn delete_matching(&self, pattern: &Regex) -> Vec<String> {
        let mut state = self.state.write().await;
        let matched: Vec<String> = state
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();
        for key in &matched {
            state.remove(key);
        }
        matched
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Drop every entry, returning how many were removed.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.len();
        state.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::glob_to_regex;

    fn store(max_size: usize) -> MemoryStore {
        MemoryStore::new(MemoryStoreConfig {
            max_size,
            default_ttl: Duration::from_secs(60),
        })
    }

    async fn value_of(outcome: ReadOutcome) -> Option<String> {
        match outcome {
            ReadOutcome::Hit(value) => Some(value.decode().unwrap()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = store(10);

        assert!(matches!(store.get("user:1").await, ReadOutcome::Miss));

        store
            .set("user:1", StoredValue::typed("alice".to_string()), None)
            .await;
        assert_eq!(
            value_of(store.get("user:1").await).await,
            Some("alice".to_string())
        );
        assert!(store.has("user:1").await);

        assert!(store.delete("user:1").await);
        assert!(matches!(store.get("user:1").await, ReadOutcome::Miss));
        assert!(!store.delete("user:1").await);
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_access() {
        let store = store(10);
        store
            .set(
                "temp:x",
                StoredValue::typed(1u32),
                Some(Duration::from_millis(30)),
            )
            .await;

        assert!(matches!(store.get("temp:x").await, ReadOutcome::Hit(_)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(matches!(store.get("temp:x").await, ReadOutcome::Expired));
        // Removed on the expired access, so the second read is a plain miss.
        assert!(matches!(store.get("temp:x").await, ReadOutcome::Miss));
    }

    #[tokio::test]
    async fn test_eviction_prefers_lowest_access_count() {
        let store = store(2);
        store.set("a", StoredValue::typed(1u32), None).await;
        store.set("b", StoredValue::typed(2u32), None).await;

        // Access "a" once more than "b": "b" becomes the victim.
        let _ = store.get("a").await;

        let outcome = store.set("c", StoredValue::typed(3u32), None).await;
        assert_eq!(outcome.evicted.as_deref(), Some("b"));
        assert!(store.has("a").await);
        assert!(store.has("c").await);
        assert!(!store.has("b").await);
    }

    #[tokio::test]
    async fn test_eviction_tie_breaks_on_oldest_stored_at() {
        let store = store(2);
        store.set("old", StoredValue::typed(1u32), None).await;
        // Separate insertion timestamps so the tie-break is deterministic.
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.set("new", StoredValue::typed(2u32), None).await;

        // Equal access counts; the older entry is evicted.
        let outcome = store.set("c", StoredValue::typed(3u32), None).await;
        assert_eq!(outcome.evicted.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let store = store(2);
        store.set("a", StoredValue::typed(1u32), None).await;
        store.set("b", StoredValue::typed(2u32), None).await;

        let outcome = store.set("a", StoredValue::typed(10u32), None).await;
        assert!(outcome.evicted.is_none());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let store = store(10);
        store
            .set(
                "short:1",
                StoredValue::typed(1u32),
                Some(Duration::from_millis(20)),
            )
            .await;
        store
            .set(
                "short:2",
                StoredValue::typed(2u32),
                Some(Duration::from_millis(20)),
            )
            .await;
        store
            .set(
                "long:1",
                StoredValue::typed(3u32),
                Some(Duration::from_secs(60)),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut removed = store.cleanup().await;
        removed.sort();
        assert_eq!(removed, vec!["short:1".to_string(), "short:2".to_string()]);
        assert_eq!(store.len().await, 1);
        assert!(store.has("long:1").await);
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let store = store(10);
        store.set("work:1", StoredValue::typed(1u32), None).await;
        store
            .set("work:1:meta", StoredValue::typed(2u32), None)
            .await;
        store.set("user:1", StoredValue::typed(3u32), None).await;

        let pattern = glob_to_regex("work:1*").unwrap();
        let mut removed = store.delete_matching(&pattern).await;
        removed.sort();
        assert_eq!(removed, vec!["work:1".to_string(), "work:1:meta".to_string()]);
        assert!(store.has("user:1").await);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store(10);
        store.set("a", StoredValue::typed(1u32), None).await;
        store.set("b", StoredValue::typed(2u32), None).await;
        assert_eq!(store.clear().await, 2);
        assert!(store.is_empty().await);
    }
}
