//! Function-level caching helpers.
//!
//! Thin wrappers for the two common call sites: wrap a read in the cache
//! (`cached`) and flush patterns after a successful write (`invalidates`).

use std::future::Future;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::manager::{CacheManager, CacheOptions};

/// Run `op` through the cache under the given key.
///
/// Equivalent to `get_or_set` with the key rendered from a [`CacheKey`]
/// and an optional TTL override applied to every written layer.
pub async fn cached<T, F, Fut>(
    manager: &CacheManager,
    key: &CacheKey,
    ttl: Option<Duration>,
    op: F,
) -> Result<T, CacheError>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    let mut opts = CacheOptions::default();
    opts.ttl = ttl;
    manager.get_or_set(&key.generate(), op, &opts).await
}

/// Run `op`, and on success delete every key matching the given patterns.
///
/// The invalidation runs after the operation commits; a failed operation
/// leaves the cache untouched.
pub async fn invalidates<T, E, F, Fut>(
    manager: &CacheManager,
    patterns: &[String],
    op: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let value = op().await?;
    let opts = CacheOptions::default();
    for pattern in patterns {
        if let Err(e) = manager.delete_pattern(pattern, &opts).await {
            tracing::warn!(pattern, error = %e, "post-write invalidation failed");
        }
    }
    Ok(value)
}
