//! Result type for operations with best-effort cache side effects.

use std::fmt;

use crate::error::CacheError;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Cache hit.
    Cache,
    /// Authoritative document store.
    Store,
}

/// Cache operation that failed on a best-effort path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Get,
    Set,
    Delete,
}

impl fmt::Display for CacheOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Set => write!(f, "set"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A cache operation that failed without failing the enclosing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFailure {
    pub op: CacheOp,
    /// Logical key (without namespace).
    pub key: String,
    pub error: CacheError,
}

impl CacheFailure {
    pub fn new(op: CacheOp, key: impl Into<String>, error: CacheError) -> Self {
        Self {
            op,
            key: key.into(),
            error,
        }
    }
}

/// Primary result plus any cache side effects that failed along the way.
///
/// A non-empty `cache_failures` never means the primary operation failed; it lets
/// callers and tests see degraded cache behavior without reading logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub source: Source,
    pub cache_failures: Vec<CacheFailure>,
}

impl<T> Outcome<T> {
    /// Value served from the cache.
    pub fn cached(value: T) -> Self {
        Self {
            value,
            source: Source::Cache,
            cache_failures: Vec::new(),
        }
    }

    /// Value read from (or written to) the document store.
    pub fn stored(value: T) -> Self {
        Self {
            value,
            source: Source::Store,
            cache_failures: Vec::new(),
        }
    }

    pub fn with_failures(mut self, failures: impl IntoIterator<Item = CacheFailure>) -> Self {
        self.cache_failures.extend(failures);
        self
    }

    pub fn push_failure(&mut self, failure: CacheFailure) {
        self.cache_failures.push(failure);
    }

    /// Returns `true` if any cache side effect failed.
    pub fn is_degraded(&self) -> bool {
        !self.cache_failures.is_empty()
    }

    pub fn is_cache_hit(&self) -> bool {
        self.source == Source::Cache
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            source: self.source,
            cache_failures: self.cache_failures,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
