//! Raw byte-level cache backend interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// Key-value store with per-entry expiration.
///
/// Keys handed to a backend are already namespaced; the backend never builds keys.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the stored bytes, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes the given keys. Absent keys are not an error. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Removes every key starting with `prefix` in one server-side step.
    async fn flush_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Lightweight round trip.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
