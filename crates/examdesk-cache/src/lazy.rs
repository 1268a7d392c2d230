//! Once-guarded asynchronous cache initialization.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::error::CacheError;
use crate::store::CacheStore;

type Initializer = Box<dyn Fn() -> BoxFuture<'static, Result<CacheStore, CacheError>> + Send + Sync>;

/// Cache store handle built on first use.
///
/// The initializer runs at most once. Concurrent first callers wait for the same
/// attempt and all observe the same store or the same error; a failed attempt is
/// not retried.
pub struct LazyCache {
    cell: OnceCell<Result<Arc<CacheStore>, CacheError>>,
    init: Initializer,
}

impl std::fmt::Debug for LazyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyCache")
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}

impl LazyCache {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CacheStore, CacheError>> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Box::new(move || init().boxed()),
        }
    }

    /// Initializes on first call, then returns the stored result.
    pub async fn get(&self) -> Result<Arc<CacheStore>, CacheError> {
        self.cell
            .get_or_init(|| async {
                let result = (self.init)().await;
                match &result {
                    Ok(store) => {
                        tracing::info!(
                            backend = store.backend_name(),
                            namespace = store.namespace(),
                            "cache initialized"
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "cache initialization failed"),
                }
                result.map(Arc::new)
            })
            .await
            .clone()
    }

    /// The result of a completed initialization, if any.
    pub fn get_if_initialized(&self) -> Option<Result<Arc<CacheStore>, CacheError>> {
        self.cell.get().cloned()
    }
}
