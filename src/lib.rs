//! strata-cache - A tiered caching library for Rust
//!
//! This library provides a two-layer caching subsystem with:
//! - Bounded in-process memory layer (TTL + LRU)
//! - Redis-backed remote layer with lazy, self-healing connections
//! - Structured cache keys with per-domain TTL/layer strategies
//! - Read-through loading with per-key stampede protection
//! - Retry, circuit breaking, and event-driven invalidation
//!
//! # Example
//!
//! ```ignore
//! use strata_cache::{
//!     CacheKey, CacheManager, CacheOptions, KeyPrefix, KeyStrategy, MemoryStore,
//!     MemoryStoreConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let memory = Arc::new(MemoryStore::new(MemoryStoreConfig::default()));
//!     let cache = CacheManager::new(memory, None, Arc::new(KeyStrategy::with_defaults()));
//!
//!     let key = CacheKey::new(KeyPrefix::User, "123").with_suffix("profile");
//!     let profile = cache
//!         .get_or_set(
//!             &key.generate(),
//!             || async {
//!                 // Load from the database.
//!                 Ok(format!("profile for {}", key.identifier))
//!             },
//!             &CacheOptions::default(),
//!         )
//!         .await
//!         .unwrap();
//!     println!("{}", profile);
//! }
//! ```

mod breaker;
mod config;
mod decorate;
mod entry;
mod error;
mod events;
mod key;
mod manager;
mod retry;
pub mod stores;
mod sync;
mod utils;

// Re-export public API
pub use breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use config::{
    CacheConfig, InvalidationConfig, InvalidationMode, KeyStrategy, RemoteConfig, SizeConfig,
    TtlConfig,
};
pub use decorate::{cached, invalidates};
pub use entry::{CacheEntry, CacheLayer, StoredValue};
pub use error::{BreakerError, CacheError};
pub use events::{CacheEvent, CacheEventKind, EventSink, TracingSink};
pub use key::{CacheKey, KeyPrefix};
pub use manager::{CacheManager, CacheOptions, ManagerConfig};
pub use retry::{RetryManager, RetryOutcome, RetryStrategy};
pub use stores::memory::{MemoryStore, MemoryStoreConfig, ReadOutcome};
pub use stores::remote::RemoteStore;
pub use sync::{CacheSyncManager, SyncConfig, SyncEvent, SyncEventKind};
pub use utils::glob_to_regex;
