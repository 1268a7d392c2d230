//! Cache layer for the examdesk backend.
//!
//! - [`CacheStore`]: namespaced JSON values with per-call TTL over a [`CacheBackend`]
//!   ([`RedisCacheBackend`] for Redis/Dragonfly, [`LocalCacheBackend`] in-process)
//! - [`CacheAside`]: fetch-or-populate read path with per-key single-flight
//! - [`Outcome`]: primary result plus failed best-effort cache side effects
//! - [`LazyCache`]: once-guarded construction of the shared store
//!
//! The cache is never required: callers hold `Option<CacheAside<_>>` and go
//! straight to the document store when it is `None`.

mod aside;
mod backend;
mod config;
mod error;
mod lazy;
mod local;
mod outcome;
mod redis_backend;
mod store;

pub use aside::{CacheAside, CacheAsideStats};
pub use backend::CacheBackend;
pub use config::{RedisConfig, mask_password};
pub use error::{CacheAsideError, CacheError};
pub use lazy::LazyCache;
pub use local::{CachedEntry, LocalCacheBackend};
pub use outcome::{CacheFailure, CacheOp, Outcome, Source};
pub use redis_backend::RedisCacheBackend;
pub use store::CacheStore;
