//! Error types for cache operations.

use examdesk_storage::Interrupted;

/// Errors returned by the cache store and its backends.
///
/// `NotFound` is a control-flow signal (miss or expired entry), not a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Key absent or expired.
    #[error("Cache miss: {key}")]
    NotFound {
        /// Namespaced key that was looked up.
        key: String,
    },

    /// The backend could not be reached or rejected the command.
    #[error("Cache store error: {message}")]
    Store {
        /// Description of the backend failure.
        message: String,
    },

    /// The backend did not answer within the per-operation timeout.
    #[error("Cache operation timed out after {millis}ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        millis: u64,
    },

    /// A value could not be encoded.
    #[error("Cache serialization error: {message}")]
    Serialization {
        /// Encoder error text.
        message: String,
    },

    /// A stored blob could not populate the requested shape.
    #[error("Cache deserialization error for {key}: {message}")]
    Deserialization {
        /// Namespaced key whose blob was rejected.
        key: String,
        /// Decoder error text.
        message: String,
    },

    /// Invalid cache configuration or initialization failure.
    #[error("Cache configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` for a cache miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the backend itself failed (connection or timeout).
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Timeout { .. })
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::store(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::store(format!("connection pool: {e}"))
    }
}

/// Errors produced by the cache-aside orchestrator itself.
///
/// Repository error types implement `From<CacheAsideError>` so the orchestrator can
/// surface these next to the caller's own fetch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheAsideError {
    /// The caller's deadline passed or the caller cancelled while waiting.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// The fetched value could not be encoded for the cache and the caller.
    #[error("fetched value could not be serialized: {message}")]
    Serialization {
        /// Encoder error text.
        message: String,
    },

    /// The fetched value does not fit the requested shape.
    #[error("fetched value does not match the requested shape: {message}")]
    Deserialization {
        /// Decoder error text.
        message: String,
    },

    /// The shared fetch task panicked or was aborted.
    #[error("shared fetch task aborted for {key}")]
    FetchAborted {
        /// Namespaced key of the fetch.
        key: String,
    },
}

impl CacheAsideError {
    /// Returns `true` if the caller cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Interrupted(Interrupted::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(CacheError::not_found("ns:k").is_not_found());
        assert!(!CacheError::store("down").is_not_found());
        assert!(CacheError::store("down").is_store_failure());
        assert!(CacheError::Timeout { millis: 5 }.is_store_failure());
        assert!(
            !CacheError::Deserialization {
                key: "ns:k".into(),
                message: "bad".into()
            }
            .is_store_failure()
        );
    }

    #[test]
    fn test_aside_error_display() {
        let err = CacheAsideError::from(Interrupted::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "operation cancelled by caller");
        assert!(!CacheAsideError::from(Interrupted::DeadlineExceeded).is_cancelled());
    }
}
