//! Cache-aside read path with per-key single-flight.
//!
//! [`CacheAside::get_or_fetch`] serves from the cache when it can, otherwise runs
//! the caller's fetch against the document store and best-effort populates the
//! cache. Concurrent misses for the same key share one fetch.
//!
//! Writers call [`CacheAside::invalidate`] after changing the document store. It
//! detaches fetches already in flight for those keys, so later misses start a
//! fresh fetch and a detached fetch never writes its result into the cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use examdesk_storage::RequestContext;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{CacheAsideError, CacheError};
use crate::outcome::{CacheFailure, CacheOp, Outcome};
use crate::store::CacheStore;

/// Result of one shared fetch, handed to every waiter.
#[derive(Clone)]
struct Flight<E> {
    result: Result<Value, E>,
    failures: Vec<CacheFailure>,
}

type SharedFlight<E> = Shared<BoxFuture<'static, Flight<E>>>;

/// A registered fetch. `id` tells a flight apart from a newer one on the same key.
struct InFlight<E> {
    id: u64,
    flight: SharedFlight<E>,
}

/// Fetches in flight, keyed by namespaced cache key.
struct Flights<E> {
    entries: DashMap<String, InFlight<E>>,
    next_id: AtomicU64,
}

impl<E> Flights<E> {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether flight `id` is still the one registered for `key`.
    fn is_current(&self, key: &str, id: u64) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.id == id)
    }

    /// Unregisters flight `id`, leaving any newer flight for `key` in place.
    fn finish(&self, key: &str, id: u64) {
        self.entries.remove_if(key, |_, entry| entry.id == id);
    }

    /// Unregisters whatever flight is registered for `key`.
    fn detach(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

/// Unregisters a flight when its task ends, including by panic.
struct FlightGuard<E> {
    flights: Arc<Flights<E>>,
    key: String,
    id: u64,
}

impl<E> Drop for FlightGuard<E> {
    fn drop(&mut self) {
        self.flights.finish(&self.key, self.id);
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    joined: AtomicU64,
    degraded_reads: AtomicU64,
    populate_failures: AtomicU64,
    stale_populates: AtomicU64,
}

/// Snapshot of orchestrator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheAsideStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads that did not find a usable cache entry (includes degraded reads).
    pub misses: u64,
    /// Fetches actually started against the document store.
    pub fetches: u64,
    /// Misses that joined a fetch already in flight.
    pub joined: u64,
    /// Cache reads that failed for reasons other than a miss.
    pub degraded_reads: u64,
    /// Best-effort cache writes that failed after a fetch.
    pub populate_failures: u64,
    /// Fetch results not cached because the key was invalidated meanwhile.
    pub stale_populates: u64,
}

/// Fetch-or-populate orchestrator over a [`CacheStore`].
///
/// `E` is the caller's error type. Fetch errors are returned to every waiter
/// unchanged, so `E` must be `Clone`.
pub struct CacheAside<E> {
    store: Arc<CacheStore>,
    flights: Arc<Flights<E>>,
    counters: Arc<Counters>,
}

impl<E> Clone for CacheAside<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            flights: Arc::clone(&self.flights),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<E> std::fmt::Debug for CacheAside<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("store", &self.store)
            .field("in_flight", &self.flights.entries.len())
            .finish()
    }
}

impl<E> CacheAside<E>
where
    E: From<CacheAsideError> + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            flights: Arc::new(Flights::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// The underlying cache store (used for invalidation).
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.entries.len()
    }

    pub fn stats(&self) -> CacheAsideStats {
        let c = &self.counters;
        CacheAsideStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            joined: c.joined.load(Ordering::Relaxed),
            degraded_reads: c.degraded_reads.load(Ordering::Relaxed),
            populate_failures: c.populate_failures.load(Ordering::Relaxed),
            stale_populates: c.stale_populates.load(Ordering::Relaxed),
        }
    }

    /// Deletes `keys` from the cache after a write to the document store.
    ///
    /// Fetches in flight for these keys are detached first: callers already
    /// waiting on them still get their result, but new misses start a fresh
    /// fetch and the detached fetch does not populate the cache.
    pub async fn invalidate(&self, keys: &[&str]) -> Result<u64, CacheError> {
        for key in keys {
            if self.flights.detach(&self.store.key(key)) {
                tracing::debug!(key = %key, "detached in-flight fetch");
            }
        }
        self.store.invalidate(keys).await
    }

    /// Returns the cached value for `key`, or fetches, caches and returns it.
    ///
    /// - A cache hit never calls `fetch`.
    /// - Cache read failures other than a miss are logged and treated as a miss.
    /// - A fetch error is returned unchanged.
    /// - A failed cache write after a successful fetch is logged and reported in
    ///   [`Outcome::cache_failures`]; the value is still returned.
    /// - The fetched value is re-decoded into `T`, which may differ from the
    ///   fetch's own output type as long as the JSON shapes agree.
    ///
    /// `fetch` runs on a spawned task under a detached copy of `ctx` (same deadline,
    /// no caller cancellation) and is shared with concurrent misses on the same key.
    /// When `ctx` is cancelled or its deadline passes, this call stops waiting and
    /// returns [`CacheAsideError::Interrupted`].
    pub async fn get_or_fetch<T, R, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Outcome<T>, E>
    where
        T: DeserializeOwned,
        R: Serialize + Send + 'static,
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let mut failures = Vec::new();
        match ctx.run(self.store.get::<T>(key)).await {
            Err(interrupted) => return Err(CacheAsideError::from(interrupted).into()),
            Ok(Ok(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "cache hit");
                return Ok(Outcome::cached(value));
            }
            Ok(Err(e)) if e.is_not_found() => {
                tracing::debug!(key = %key, "cache miss");
            }
            Ok(Err(e)) => {
                self.counters.degraded_reads.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "cache read failed, falling back to store");
                failures.push(CacheFailure::new(CacheOp::Get, key, e));
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let flight = self.join_or_start(ctx, key, ttl, fetch);
        let flight = ctx
            .run(flight)
            .await
            .map_err(|interrupted| E::from(CacheAsideError::from(interrupted)))?;

        failures.extend(flight.failures);
        let value = flight.result?;
        let value = serde_json::from_value::<T>(value).map_err(|e| {
            E::from(CacheAsideError::Deserialization {
                message: e.to_string(),
            })
        })?;
        Ok(Outcome::stored(value).with_failures(failures))
    }

    fn join_or_start<R, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> SharedFlight<E>
    where
        R: Serialize + Send + 'static,
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let full_key = self.store.key(key);
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let flight = match self.flights.entries.entry(full_key.clone()) {
            Entry::Occupied(occupied) => {
                self.counters.joined.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "joining in-flight fetch");
                return occupied.get().flight.clone();
            }
            Entry::Vacant(vacant) => {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
                let id = self.flights.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard {
                    flights: Arc::clone(&self.flights),
                    key: full_key.clone(),
                    id,
                };
                let task = tokio::spawn(run_flight(
                    Arc::clone(&self.store),
                    Arc::clone(&self.counters),
                    guard,
                    ctx.detached(),
                    key.to_string(),
                    ttl,
                    fetch,
                    armed_rx,
                ));
                let aborted_key = full_key.clone();
                let flight = async move {
                    task.await.unwrap_or_else(|e| {
                        tracing::error!(key = %aborted_key, error = %e, "shared fetch task failed");
                        Flight {
                            result: Err(E::from(CacheAsideError::FetchAborted { key: aborted_key })),
                            failures: Vec::new(),
                        }
                    })
                }
                .boxed()
                .shared();
                vacant.insert(InFlight {
                    id,
                    flight: flight.clone(),
                });
                flight
            }
        };

        // The task only starts (and can only unregister itself) after this
        // signal, so the entry is always inserted before it can be removed.
        let _ = armed_tx.send(());
        flight
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_flight<E, R, F, Fut>(
    store: Arc<CacheStore>,
    counters: Arc<Counters>,
    guard: FlightGuard<E>,
    ctx: RequestContext,
    key: String,
    ttl: Duration,
    fetch: F,
    armed: oneshot::Receiver<()>,
) -> Flight<E>
where
    E: From<CacheAsideError> + Clone + Send + Sync + 'static,
    R: Serialize + Send + 'static,
    F: FnOnce(RequestContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let _ = armed.await;
    // `guard` unregisters the flight when this future is dropped, whether it
    // completed or the fetch panicked.
    fetch_and_populate(&store, &counters, &guard, ctx, &key, ttl, fetch).await
}

async fn fetch_and_populate<E, R, F, Fut>(
    store: &CacheStore,
    counters: &Counters,
    guard: &FlightGuard<E>,
    ctx: RequestContext,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Flight<E>
where
    E: From<CacheAsideError>,
    R: Serialize,
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let fetched = match ctx.run(fetch(ctx.clone())).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            return Flight {
                result: Err(e),
                failures: Vec::new(),
            };
        }
        Err(interrupted) => {
            return Flight {
                result: Err(CacheAsideError::from(interrupted).into()),
                failures: Vec::new(),
            };
        }
    };

    let value = match serde_json::to_value(&fetched) {
        Ok(value) => value,
        Err(e) => {
            return Flight {
                result: Err(CacheAsideError::Serialization {
                    message: e.to_string(),
                }
                .into()),
                failures: Vec::new(),
            };
        }
    };

    let is_current = || guard.flights.is_current(&guard.key, guard.id);
    let mut failures = Vec::new();
    if !is_current() {
        counters.stale_populates.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, "key invalidated during fetch, not caching result");
        return Flight {
            result: Ok(value),
            failures,
        };
    }

    let populated = match ctx.run(store.set(key, &value, ttl)).await {
        Ok(result) => result,
        Err(interrupted) => Err(CacheError::store(interrupted.to_string())),
    };
    match populated {
        // An invalidation that detached this flight while the write was in
        // progress may have run its delete before the write landed.
        Ok(()) if !is_current() => {
            counters.stale_populates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "key invalidated during populate, removing result");
            if let Ok(Err(e)) = ctx.run(store.delete(key)).await {
                tracing::warn!(key = %key, error = %e, "failed to remove stale cache entry");
                failures.push(CacheFailure::new(CacheOp::Delete, key, e));
            }
        }
        Ok(()) => {}
        Err(e) => {
            counters.populate_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %key, error = %e, "failed to populate cache after fetch");
            failures.push(CacheFailure::new(CacheOp::Set, key, e));
        }
    }

    Flight {
        result: Ok(value),
        failures,
    }
}
