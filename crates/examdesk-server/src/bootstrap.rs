//! Wiring from configuration to a ready [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use examdesk_accounts::{AccountCache, CredentialHasher, StudentRepository, UserRepository};
use examdesk_cache::{
    CacheAside, CacheBackend, CacheStore, LazyCache, LocalCacheBackend, RedisCacheBackend,
};
use examdesk_db_postgres::PostgresDocumentStore;
use examdesk_storage::DynDocumentStore;

use crate::auth::JwtService;
use crate::config::{AppConfig, CacheMode, CacheSettings, StorageBackend};
use crate::server::AppState;

/// Connects the configured document store.
pub async fn init_document_store(cfg: &AppConfig) -> anyhow::Result<DynDocumentStore> {
    let store: DynDocumentStore = match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory document store; data is lost on restart");
            examdesk_db_memory::create_document_store()
        }
        StorageBackend::Postgres => Arc::new(
            PostgresDocumentStore::new(&cfg.storage.postgres)
                .await
                .context("failed to connect to PostgreSQL")?,
        ),
    };
    tracing::info!(backend = store.backend_name(), "document store ready");
    Ok(store)
}

/// Builds the lazily-initialized cache for `settings`, or `None` when disabled.
pub fn lazy_cache(settings: &CacheSettings) -> Option<LazyCache> {
    if settings.mode == CacheMode::Disabled {
        return None;
    }
    let settings = settings.clone();
    Some(LazyCache::new(move || {
        let settings = settings.clone();
        async move {
            let backend: Arc<dyn CacheBackend> = match settings.mode {
                CacheMode::Local => Arc::new(LocalCacheBackend::new()),
                _ => Arc::new(RedisCacheBackend::connect(&settings.redis).await?),
            };
            CacheStore::new(
                backend,
                settings.namespace,
                Duration::from_millis(settings.op_timeout_ms),
            )
        }
    }))
}

/// Resolves the cache handle. A cache that fails to come up is logged and the
/// service runs without one.
pub async fn init_cache(lazy: Option<&LazyCache>) -> AccountCache {
    let lazy = lazy?;
    match lazy.get().await {
        Ok(store) => Some(CacheAside::new(store)),
        Err(e) => {
            tracing::warn!(error = %e, "cache unavailable, continuing without cache");
            None
        }
    }
}

/// Builds repositories over injected handles and declares their indexes.
pub async fn build_state(
    cfg: &AppConfig,
    store: DynDocumentStore,
    cache: AccountCache,
    hasher: Arc<CredentialHasher>,
) -> anyhow::Result<AppState> {
    let students = StudentRepository::new(
        store.clone(),
        cache.clone(),
        cfg.repositories.student_ttl(),
        hasher.clone(),
    );
    let users = UserRepository::new(
        store.clone(),
        cache.clone(),
        cfg.repositories.user_ttl(),
        hasher,
    );
    students
        .ensure_indexes()
        .await
        .context("failed to create student indexes")?;
    users
        .ensure_indexes()
        .await
        .context("failed to create user indexes")?;

    Ok(AppState {
        store,
        cache,
        students,
        users,
        jwt: Arc::new(JwtService::new(&cfg.auth)),
        request_timeout: cfg.request_timeout(),
    })
}

/// Full startup: document store, cache, repositories.
pub async fn bootstrap(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let store = init_document_store(cfg).await?;
    let lazy = lazy_cache(&cfg.cache);
    let cache = init_cache(lazy.as_ref()).await;
    build_state(cfg, store, cache, Arc::new(CredentialHasher::new())).await
}
