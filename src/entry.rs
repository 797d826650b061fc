use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CacheError;
use crate::utils::now_ms;

/// The storage tiers a cache operation can address.
///
/// `Origin` never stores anything itself; it marks strategies whose values
/// are recomputable from the source of truth via a `get_or_set` factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLayer {
    Memory,
    Remote,
    Origin,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::Memory => "memory",
            CacheLayer::Remote => "remote",
            CacheLayer::Origin => "origin",
        }
    }
}

impl std::fmt::Display for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-erased cached value.
///
/// The memory layer holds typed values zero-copy behind an `Arc<dyn Any>`;
/// the remote layer holds serialized JSON. `decode` converts either form
/// back to the caller's type, which is the crate's serialization contract:
/// every cached type must be `Serialize + DeserializeOwned + Clone`.
#[derive(Clone)]
pub enum StoredValue {
    Typed(Arc<dyn Any + Send + Sync>),
    Serialized(String),
}

impl StoredValue {
    /// Wrap a typed value for in-memory storage.
    pub fn typed<V>(value: V) -> Self
    where
        V: Send + Sync + 'static,
    {
        StoredValue::Typed(Arc::new(value))
    }

    /// Serialize a value to JSON for remote storage.
    pub fn serialized<V: Serialize>(value: &V) -> Result<Self, CacheError> {
        let json = serde_json::to_string(value)
            .map_err(|e| CacheError::Serialization(format!("encode failed: {}", e)))?;
        Ok(StoredValue::Serialized(json))
    }

    /// Recover the caller's type from either storage form.
    ///
    /// A downcast failure means the caller asked for a different type than
    /// was cached under this key, which is a data-contract violation.
    pub fn decode<T>(&self) -> Result<T, CacheError>
    where
        T: Clone + DeserializeOwned + Send + Sync + 'static,
    {
        match self {
            StoredValue::Typed(any) => any
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| CacheError::Serialization("cached value type mismatch".to_string())),
            StoredValue::Serialized(json) => serde_json::from_str(json)
                .map_err(|e| CacheError::Serialization(format!("decode failed: {}", e))),
        }
    }
}

/// A cache entry with the bookkeeping the eviction policy needs.
///
/// Entries are owned exclusively by the layer that stores them; only the
/// memory layer mutates `access_count`/`last_accessed`.
#[derive(Clone)]
pub struct CacheEntry {
    pub value: StoredValue,
    /// Unix timestamp in milliseconds at insertion.
    pub stored_at: i64,
    pub ttl: Duration,
    /// Number of reads since insertion. Eviction prefers the lowest count.
    pub access_count: u64,
    /// Unix timestamp in milliseconds of the most recent read.
    pub last_accessed: i64,
}

impl CacheEntry {
    pub fn new(value: StoredValue, ttl: Duration) -> Self {
        let now = now_ms();
        CacheEntry {
            value,
            stored_at: now,
            ttl,
            access_count: 0,
            last_accessed: now,
        }
    }

    /// An entry is expired strictly after `stored_at + ttl`.
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.stored_at > self.ttl.as_millis() as i64
    }

    /// Record a read: bump the access count and recency.
    pub fn touch(&mut self, now: i64) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}
