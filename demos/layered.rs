//! Two-layer cache demo: memory plus Redis, with read-through loading and
//! event-driven invalidation.
//!
//! Run with a local Redis:
//!
//! ```sh
//! cargo run --example layered
//! ```
//!
//! Without Redis the demo still works; remote operations degrade to misses.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_cache::{
    CacheError, CacheKey, CacheManager, CacheOptions, CacheSyncManager, KeyPrefix, KeyStrategy,
    MemoryStore, MemoryStoreConfig, RemoteConfig, RemoteStore, SyncConfig, TracingSink,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

async fn load_user(id: u64) -> Result<User, CacheError> {
    // Stand-in for a database query.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(User {
        id,
        name: format!("user-{}", id),
    })
}

#[tokio::main]
async fn main() -> Result<(), CacheError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata_cache=debug,layered=info".into()),
        )
        .init();

    let memory = Arc::new(MemoryStore::new(MemoryStoreConfig::default()));
    let remote = Arc::new(RemoteStore::new(RemoteConfig::from_env())?);
    let cache = Arc::new(
        CacheManager::new(
            memory,
            Some(remote),
            Arc::new(KeyStrategy::with_defaults()),
        )
        .with_sink(Arc::new(TracingSink)),
    );

    let maintenance = cache.spawn_maintenance(Duration::from_secs(30));

    let key = CacheKey::new(KeyPrefix::User, "42").with_suffix("profile");
    let opts = CacheOptions::default();

    // First call loads from the origin and fills both layers.
    let user = cache
        .get_or_set(&key.generate(), || load_user(42), &opts)
        .await?;
    tracing::info!(?user, "loaded from origin");

    // Second call is a memory hit.
    let user = cache
        .get_or_set(&key.generate(), || load_user(42), &opts)
        .await?;
    tracing::info!(?user, "served from cache");

    // A domain update invalidates every key for that user.
    let sync = Arc::new(CacheSyncManager::new(cache.clone(), SyncConfig::default()));
    sync.handle_user_updated("42").await;
    let removed = sync.drain().await;
    tracing::info!(removed, "invalidated after update");

    let present = cache.exists(&key.generate(), &opts).await?;
    tracing::info!(present, "after invalidation");

    maintenance.abort();
    Ok(())
}
