//! Get-or-compute orchestration over one site's store.
//!
//! Concurrent misses for the same key share a single computation. The
//! computation runs on its own task, so it finishes and populates the store
//! even when every caller has gone away.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::types::{ResourceType, SiteId};
use crate::upstream::UpstreamError;

use super::config::{CacheConfig, TtlPolicy};
use super::keys::{CacheKey, Purge};
use super::store::Store;

const METRIC_CACHE_COALESCED: &str = "press_cache_coalesced_total";
const METRIC_CACHE_INVALIDATED: &str = "press_cache_invalidated_total";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("cache computation for `{key}` aborted: {reason}")]
    Aborted { key: String, reason: String },
}

/// How a read was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from a live entry.
    Hit,
    /// This caller ran the upstream computation.
    Miss,
    /// Joined a computation already in flight for the same key.
    Coalesced,
    /// The cache was skipped entirely.
    Bypass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub value: Value,
    pub status: CacheStatus,
}

/// Aggregated counters of one site's cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub coalesced: u64,
    pub size: usize,
    pub capacity: usize,
    pub in_flight: usize,
    pub hit_rate: f64,
}

impl CacheStats {
    /// Counters of a cache that has never been used.
    pub(crate) fn empty(capacity: usize) -> Self {
        Self {
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            invalidations: 0,
            coalesced: 0,
            size: 0,
            capacity,
            in_flight: 0,
            hit_rate: 0.0,
        }
    }
}

type FlightResult = Result<Value, CacheError>;
type Computation = BoxFuture<'static, Result<Value, UpstreamError>>;

struct Flight {
    id: u64,
    result: Shared<BoxFuture<'static, FlightResult>>,
}

/// Read-through cache for one site.
pub struct Manager {
    site: SiteId,
    store: Arc<Store>,
    flights: Arc<DashMap<String, Flight>>,
    ttl: TtlPolicy,
    next_flight: AtomicU64,
    coalesced: AtomicU64,
    invalidations: AtomicU64,
}

impl Manager {
    pub fn new(site: SiteId, config: &CacheConfig) -> Self {
        let store = Store::new(site.clone(), config.max_entries_non_zero());
        Self {
            site,
            store: Arc::new(store),
            flights: Arc::new(DashMap::new()),
            ttl: config.ttl.clone(),
            next_flight: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn site(&self) -> &SiteId {
        &self.site
    }

    /// Default TTL for a resource type.
    pub fn ttl_for(&self, resource: ResourceType) -> Duration {
        self.ttl.ttl_for(resource)
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// At most one `compute` runs per key at a time; concurrent callers wait
    /// on the same result. Failures reach every waiter and are never stored.
    /// `compute` is invoked with no manager lock held.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Lookup, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, UpstreamError>> + Send + 'static,
    {
        if key.site() != &self.site {
            warn!(
                site = %self.site,
                key_site = %key.site(),
                key = %key,
                "Foreign cache key; bypassing cache"
            );
            let value = compute().await?;
            return Ok(Lookup {
                value,
                status: CacheStatus::Bypass,
            });
        }

        let (flight, status, start) = match self.flights.entry(key.as_str().to_string()) {
            Entry::Occupied(existing) => {
                (existing.get().result.clone(), CacheStatus::Coalesced, None)
            }
            Entry::Vacant(vacant) => {
                // Flights store their result before leaving the table, so a
                // vacant slot plus a live entry means a completed computation.
                if let Some(value) = self.store.get(key.as_str()) {
                    return Ok(Lookup {
                        value,
                        status: CacheStatus::Hit,
                    });
                }
                let (start, flight) = self.launch(key.as_str().to_string(), ttl);
                let result = flight.result.clone();
                vacant.insert(flight);
                (result, CacheStatus::Miss, Some(start))
            }
        };

        if let Some(start) = start {
            // The flight task only exits early when the runtime is shutting down.
            let _ = start.send(compute().boxed());
        }

        if status == CacheStatus::Coalesced {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_COALESCED, "site" => self.site.to_string()).increment(1);
            debug!(site = %self.site, key = %key, "Joined in-flight computation");
        }

        let value = flight.await?;
        Ok(Lookup { value, status })
    }

    /// Spawn the task of a new flight; it runs the work sent through the
    /// returned sender.
    fn launch(&self, key: String, ttl: Duration) -> (oneshot::Sender<Computation>, Flight) {
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let flights = Arc::clone(&self.flights);
        let task_key = key.clone();
        let (start, work) = oneshot::channel::<Computation>();

        let handle = tokio::spawn(async move {
            let result = match work.await {
                Ok(computation) => computation.await,
                Err(_) => Err(UpstreamError::Aborted(
                    "computation dropped before it started".to_string(),
                )),
            };
            settle(&flights, &store, task_key, id, &result, ttl);
            result
        });

        let flights = Arc::clone(&self.flights);
        let result = async move {
            match handle.await {
                Ok(result) => result.map_err(CacheError::from),
                Err(join_err) => {
                    flights.remove_if(&key, |_, flight| flight.id == id);
                    warn!(key = %key, error = %join_err, "Cache computation task failed");
                    Err(CacheError::Aborted {
                        key,
                        reason: join_err.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared();

        (start, Flight { id, result })
    }

    /// Remove every entry the purge covers; returns the number removed.
    ///
    /// Computations in flight for covered keys are detached first so their
    /// results are never stored.
    pub fn invalidate(&self, purge: &Purge) -> usize {
        if purge.site() != &self.site {
            warn!(
                site = %self.site,
                purge_site = %purge.site(),
                purge = %purge,
                "Rejected cross-site invalidation"
            );
            return 0;
        }

        let mut detached = 0usize;
        self.flights.retain(|key, _| {
            let covered = purge.matches(key);
            if covered {
                detached += 1;
            }
            !covered
        });

        let removed = self.store.delete_matching(purge);
        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        counter!(METRIC_CACHE_INVALIDATED, "site" => self.site.to_string())
            .increment(removed as u64);
        debug!(site = %self.site, purge = %purge, removed, detached, "Cache invalidated");
        removed
    }

    pub fn invalidate_all(&self, purges: &[Purge]) -> usize {
        purges.iter().map(|purge| self.invalidate(purge)).sum()
    }

    /// Drop everything cached for this site.
    pub fn clear(&self) -> usize {
        let removed = self.invalidate(&Purge::Site(self.site.clone()));
        info!(site = %self.site, removed, "Site cache cleared");
        removed
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.stats();
        let lookups = store.hits + store.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            store.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: store.hits,
            misses: store.misses,
            evictions: store.evictions,
            expirations: store.expirations,
            invalidations: self.invalidations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            size: store.size,
            capacity: store.capacity,
            in_flight: self.in_flight(),
            hit_rate,
        }
    }
}

/// Store a finished computation if its flight is still registered.
///
/// Runs under the flight's map shard, which serialises it against
/// `Manager::invalidate` detaching the same flight.
fn settle(
    flights: &DashMap<String, Flight>,
    store: &Store,
    key: String,
    id: u64,
    result: &Result<Value, UpstreamError>,
    ttl: Duration,
) {
    match flights.entry(key) {
        Entry::Occupied(current) if current.get().id == id => {
            if let Ok(value) = result {
                if ttl.is_zero() {
                    debug!(key = %current.key(), "Zero TTL; result not cached");
                } else {
                    store.set(current.key().clone(), value.clone(), ttl);
                }
            }
            current.remove();
        }
        Entry::Occupied(current) => {
            debug!(key = %current.key(), "Flight detached by invalidation; result not cached");
        }
        Entry::Vacant(vacant) => {
            debug!(key = %vacant.key(), "Flight detached by invalidation; result not cached");
        }
    }
}
