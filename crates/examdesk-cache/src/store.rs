//! Namespaced, TTL-aware JSON cache store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// Characters that would turn a namespace into a glob pattern during flush.
const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

/// Cache store owning key construction, serialization, expiration and
/// namespace-scoped flushing.
///
/// Every key passed in is a logical key; the store prefixes it with
/// `<namespace>:`. Every backend call is bounded by `op_timeout`.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    op_timeout: Duration,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.backend_name())
            .field("namespace", &self.namespace)
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl CacheStore {
    /// Creates a store over `backend` isolated under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` when the namespace is empty, contains `:` at
    /// its end, contains whitespace or glob metacharacters, or when the timeout is zero.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        namespace: impl Into<String>,
        op_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        if op_timeout.is_zero() {
            return Err(CacheError::config("cache operation timeout must be positive"));
        }
        Ok(Self {
            backend,
            namespace,
            op_timeout,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Namespaced key for a logical key.
    pub fn key(&self, logical: &str) -> String {
        format!("{}:{logical}", self.namespace)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                millis: u64::try_from(self.op_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Encodes `value` as JSON and stores it for `ttl`.
    ///
    /// # Errors
    ///
    /// `Serialization` if encoding fails, `Config` for a zero TTL,
    /// `Store`/`Timeout` if the write fails.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        if ttl.is_zero() {
            return Err(CacheError::config("cache TTL must be positive"));
        }
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
            message: e.to_string(),
        })?;
        let key = self.key(key);
        self.bounded(self.backend.set(&key, bytes, ttl)).await
    }

    /// Looks up and decodes a value.
    ///
    /// # Errors
    ///
    /// `NotFound` when absent or expired, `Deserialization` when the stored blob
    /// does not fit `T`, `Store`/`Timeout` on backend failure.
    pub async fn get<T>(&self, key: &str) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        let key = self.key(key);
        let bytes = self
            .bounded(self.backend.get(&key))
            .await?
            .ok_or_else(|| CacheError::not_found(key.clone()))?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::Deserialization {
            key,
            message: e.to_string(),
        })
    }

    /// Removes one key; an absent key is success.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.invalidate(&[key]).await.map(|_| ())
    }

    /// Removes several keys; absent keys are success. Returns how many existed.
    pub async fn invalidate(&self, keys: &[&str]) -> Result<u64, CacheError> {
        let keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        self.bounded(self.backend.delete(&keys)).await
    }

    /// Removes every key under this namespace and no others.
    pub async fn flush(&self) -> Result<u64, CacheError> {
        let prefix = format!("{}:", self.namespace);
        self.bounded(self.backend.flush_prefix(&prefix)).await
    }

    /// Round trip to the backend.
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.bounded(self.backend.ping()).await
    }
}

fn validate_namespace(namespace: &str) -> Result<(), CacheError> {
    if namespace.is_empty() {
        return Err(CacheError::config("cache namespace must not be empty"));
    }
    if namespace.ends_with(':') {
        return Err(CacheError::config("cache namespace must not end with ':'"));
    }
    if namespace
        .chars()
        .any(|c| c.is_whitespace() || GLOB_METACHARACTERS.contains(&c))
    {
        return Err(CacheError::config(format!(
            "cache namespace '{namespace}' contains whitespace or glob characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCacheBackend;
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        score: u32,
    }

    fn store(backend: Arc<dyn CacheBackend>, ns: &str) -> CacheStore {
        CacheStore::new(backend, ns, Duration::from_secs(1)).unwrap()
    }

    struct StalledBackend;

    #[async_trait]
    impl CacheBackend for StalledBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            std::future::pending().await
        }
        async fn set(&self, _: &str, _: Vec<u8>, _: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn delete(&self, _: &[String]) -> Result<u64, CacheError> {
            std::future::pending().await
        }
        async fn flush_prefix(&self, _: &str) -> Result<u64, CacheError> {
            std::future::pending().await
        }
        async fn ping(&self) -> Result<(), CacheError> {
            std::future::pending().await
        }
        fn backend_name(&self) -> &'static str {
            "stalled"
        }
    }

    #[test]
    fn test_namespace_validation() {
        let backend: Arc<dyn CacheBackend> = Arc::new(LocalCacheBackend::new());
        let timeout = Duration::from_secs(1);
        assert!(CacheStore::new(backend.clone(), "", timeout).is_err());
        assert!(CacheStore::new(backend.clone(), "app*", timeout).is_err());
        assert!(CacheStore::new(backend.clone(), "app:", timeout).is_err());
        assert!(CacheStore::new(backend.clone(), "my app", timeout).is_err());
        assert!(CacheStore::new(backend.clone(), "app", Duration::ZERO).is_err());
        assert!(CacheStore::new(backend, "examdesk:prod", timeout).is_ok());
    }

    #[tokio::test]
    async fn test_key_is_namespaced() {
        let backend = Arc::new(LocalCacheBackend::new());
        let cache = store(backend.clone(), "app");
        assert_eq!(cache.key("student:S1"), "app:student:S1");

        cache
            .set("student:S1", &json_profile(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(backend.get("app:student:S1").await.unwrap().is_some());
    }

    fn json_profile() -> Profile {
        Profile {
            name: "Ada".into(),
            score: 90,
        }
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = store(Arc::new(LocalCacheBackend::new()), "app");
        cache
            .set("p", &json_profile(), Duration::from_secs(60))
            .await
            .unwrap();
        let back: Profile = cache.get("p").await.unwrap();
        assert_eq!(back, json_profile());
    }

    #[tokio::test]
    async fn test_get_missing_and_mismatched() {
        let cache = store(Arc::new(LocalCacheBackend::new()), "app");
        let err = cache.get::<Profile>("missing").await.unwrap_err();
        assert_eq!(err, CacheError::not_found("app:missing"));

        cache
            .set("n", &42u32, Duration::from_secs(60))
            .await
            .unwrap();
        let err = cache.get::<Profile>("n").await.unwrap_err();
        assert!(matches!(err, CacheError::Deserialization { ref key, .. } if key == "app:n"));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let cache = store(Arc::new(LocalCacheBackend::new()), "app");
        let err = cache.set("k", &1u8, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, CacheError::Config { .. }));
    }

    #[tokio::test]
    async fn test_delete_and_invalidate_idempotent() {
        let cache = store(Arc::new(LocalCacheBackend::new()), "app");
        cache.set("a", &1u8, Duration::from_secs(60)).await.unwrap();
        cache.set("b", &2u8, Duration::from_secs(60)).await.unwrap();

        cache.delete("a").await.unwrap();
        cache.delete("a").await.unwrap();
        assert_eq!(cache.invalidate(&["a", "b", "c"]).await.unwrap(), 1);
        assert!(cache.get::<u8>("b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_flush_only_own_namespace() {
        let backend: Arc<dyn CacheBackend> = Arc::new(LocalCacheBackend::new());
        let one = store(backend.clone(), "one");
        let two = store(backend.clone(), "two");
        let longer = store(backend, "one-more");
        let ttl = Duration::from_secs(60);
        for key in ["a", "b", "c"] {
            one.set(key, &1u8, ttl).await.unwrap();
            two.set(key, &2u8, ttl).await.unwrap();
            longer.set(key, &3u8, ttl).await.unwrap();
        }

        assert_eq!(one.flush().await.unwrap(), 3);
        for key in ["a", "b", "c"] {
            assert!(one.get::<u8>(key).await.unwrap_err().is_not_found());
            assert_eq!(two.get::<u8>(key).await.unwrap(), 2);
            assert_eq!(longer.get::<u8>(key).await.unwrap(), 3);
        }
    }

    #[tokio::test]
    async fn test_operations_time_out() {
        let cache = CacheStore::new(Arc::new(StalledBackend), "app", Duration::from_millis(20))
            .unwrap();
        assert_eq!(
            cache.get::<u8>("k").await.unwrap_err(),
            CacheError::Timeout { millis: 20 }
        );
        assert!(cache.health_check().await.unwrap_err().is_store_failure());
    }
}
