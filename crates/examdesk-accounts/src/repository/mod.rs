//! Entity repositories.
//!
//! Reads go through the cache-aside orchestrator when a cache is configured and
//! straight to the document store otherwise. Writes go to the document store
//! first and then delete (never rewrite) the affected cache keys.

mod student;
mod user;

pub use student::{DEFAULT_STUDENT_TTL, StudentRepository};
pub use user::{DEFAULT_USER_TTL, UserRepository};

use std::future::Future;
use std::time::Duration;

use examdesk_cache::{CacheAside, CacheFailure, CacheOp, Outcome};
use examdesk_storage::{DynDocumentStore, Filter, ObjectId, RequestContext, StorageError};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AccountError;
use crate::models::from_document;

/// Cache handle used by repositories. `None` means run without a cache.
pub type AccountCache = Option<CacheAside<AccountError>>;

/// One document collection plus its optional cache.
#[derive(Clone)]
struct CachedCollection {
    entity: &'static str,
    collection: &'static str,
    store: DynDocumentStore,
    cache: AccountCache,
    ttl: Duration,
}

impl CachedCollection {
    /// Runs a document-store call under the request deadline.
    async fn bounded<T, F>(&self, ctx: &RequestContext, fut: F) -> Result<T, AccountError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        ctx.run(fut)
            .await?
            .map_err(|e| AccountError::from_storage(self.entity, e))
    }

    /// Cache-aside lookup of a single entity.
    async fn find<T>(
        &self,
        ctx: &RequestContext,
        cache_key: String,
        filter: Filter,
        lookup: String,
    ) -> Result<Outcome<T>, AccountError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let store = self.store.clone();
        let collection = self.collection;
        let entity = self.entity;
        let fetch = move |ctx: RequestContext| async move {
            let doc = ctx
                .run(store.find_one(collection, &filter))
                .await?
                .map_err(AccountError::Storage)?
                .ok_or_else(|| AccountError::not_found(entity, lookup))?;
            from_document::<T>(doc)
        };

        match &self.cache {
            Some(cache) => cache.get_or_fetch(ctx, &cache_key, self.ttl, fetch).await,
            None => fetch(ctx.clone()).await.map(Outcome::stored),
        }
    }

    /// Best-effort write of a freshly created entity under its canonical key.
    async fn populate<T: Serialize + Sync>(
        &self,
        ctx: &RequestContext,
        key: &str,
        value: &T,
    ) -> Option<CacheFailure> {
        let cache = self.cache.as_ref()?;
        let result = match ctx.detached().run(cache.store().set(key, value, self.ttl)).await {
            Ok(result) => result,
            Err(interrupted) => Err(examdesk_cache::CacheError::store(interrupted.to_string())),
        };
        result.err().map(|e| {
            tracing::warn!(key = %key, error = %e, "failed to write cache after create");
            CacheFailure::new(CacheOp::Set, key, e)
        })
    }

    /// Best-effort deletion of cache keys after a write.
    ///
    /// Also detaches reads still fetching the pre-write document, so a read
    /// issued after this returns never sees it. Runs under the request deadline
    /// but ignores caller cancellation, since the store write it follows has
    /// already happened.
    async fn invalidate(&self, ctx: &RequestContext, keys: &[String]) -> Vec<CacheFailure> {
        let Some(cache) = &self.cache else {
            return Vec::new();
        };
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let result = match ctx.detached().run(cache.invalidate(&refs)).await {
            Ok(result) => result,
            Err(interrupted) => Err(examdesk_cache::CacheError::store(interrupted.to_string())),
        };
        match result {
            Ok(removed) => {
                tracing::debug!(keys = ?keys, removed, "cache keys invalidated");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(keys = ?keys, error = %e, "failed to invalidate cache");
                keys.iter()
                    .map(|key| CacheFailure::new(CacheOp::Delete, key.as_str(), e.clone()))
                    .collect()
            }
        }
    }
}

/// Identifier lookup with internal-identifier precedence.
///
/// A value that parses as an [`ObjectId`] is always treated as one; only values
/// that do not parse are looked up by the natural key.
#[derive(Debug, Clone, PartialEq)]
enum Lookup {
    Internal(ObjectId),
    Natural(String),
}

impl Lookup {
    fn parse(value: &str) -> Self {
        match ObjectId::parse_str(value) {
            Ok(oid) => Self::Internal(oid),
            Err(_) => Self::Natural(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_precedence() {
        let oid = ObjectId::new();
        assert_eq!(Lookup::parse(&oid.to_hex()), Lookup::Internal(oid));
        assert_eq!(Lookup::parse("S1"), Lookup::Natural("S1".into()));
        // 24 characters but not hex: natural key.
        assert_eq!(
            Lookup::parse("student-0000000000000001"),
            Lookup::Natural("student-0000000000000001".into())
        );
    }
}
