//! Observability events for cache state transitions.
//!
//! Every hit/miss/set/delete/expire/evict/clear/error transition emits a
//! [`CacheEvent`] to the sink attached to the manager. Emission is
//! fire-and-forget: sinks must not block, and no cache operation depends
//! on a sink for correctness.

use async_trait::async_trait;

use crate::entry::CacheLayer;
use crate::error::CacheError;
use crate::utils::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEventKind {
    Hit,
    Miss,
    Set,
    Delete,
    Expire,
    Evict,
    Clear,
    Error,
}

impl CacheEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventKind::Hit => "hit",
            CacheEventKind::Miss => "miss",
            CacheEventKind::Set => "set",
            CacheEventKind::Delete => "delete",
            CacheEventKind::Expire => "expire",
            CacheEventKind::Evict => "evict",
            CacheEventKind::Clear => "clear",
            CacheEventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured cache state transition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    pub layer: CacheLayer,
    pub key: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub metadata: Option<String>,
}

impl CacheEvent {
    pub fn new(kind: CacheEventKind, layer: CacheLayer, key: impl Into<String>) -> Self {
        CacheEvent {
            kind,
            layer,
            key: key.into(),
            timestamp: now_ms(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// Trait for receiving cache events.
///
/// `emit` is called synchronously in the hot path of cache operations and
/// must be fast (e.g. buffer in memory or log). `flush` is for sinks that
/// buffer; call it at shutdown or on a periodic interval.
#[async_trait]
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CacheEvent);

    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Sink that logs every event through `tracing` at debug level
/// (warn for `error` events).
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    fn emit(&self, event: CacheEvent) {
        match event.kind {
            CacheEventKind::Error => tracing::warn!(
                kind = %event.kind,
                layer = %event.layer,
                key = %event.key,
                metadata = event.metadata.as_deref().unwrap_or(""),
                "cache error"
            ),
            _ => tracing::debug!(
                kind = %event.kind,
                layer = %event.layer,
                key = %event.key,
                "cache event"
            ),
        }
    }
}
