/// Error type for cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// A cache operation against a specific layer failed (connection loss,
    /// timeout, protocol error). Read paths recover from this by treating
    /// the layer as a miss.
    #[error("[{layer}] cache error for key '{key}': {message}")]
    Operation {
        layer: String,
        key: String,
        message: String,
    },
    /// Serialization or deserialization failed. This indicates a caller-side
    /// data-contract violation and always propagates.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Invalid configuration (unknown strategy name, malformed key, bad
    /// retry parameters). Raised at startup, not at request time.
    #[error("configuration error: {0}")]
    Config(String),
    /// The remote store has never connected, or its reconnect budget is
    /// exhausted. Callers degrade to memory-only operation.
    #[error("remote store not ready: {0}")]
    NotReady(String),
    /// The origin factory supplied to `get_or_set` failed.
    #[error("origin load failed: {0}")]
    Origin(String),
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        layer: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            layer: layer.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Error returned by [`crate::CircuitBreaker::call`].
///
/// `Open` is a deliberate rejection issued without invoking the wrapped
/// operation; it is retryable once the recovery timeout has elapsed.
/// `Inner` carries the wrapped operation's own error.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit open; retry in {retry_in_ms}ms")]
    Open { retry_in_ms: u64 },
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True if this is the circuit's own rejection rather than an
    /// operation failure.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}
