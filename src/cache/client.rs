//! Caching façade over a [`ResourceClient`].
//!
//! Reads go through the site's `Manager`; successful writes apply their
//! invalidation plan before the result is handed back to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::domain::types::{ResourceId, ResourceType, SiteId};
use crate::upstream::{Mutation, Query, ResourceClient, UpstreamError};

use super::config::{CacheConfig, TtlClass};
use super::keys::{CacheKey, Purge};
use super::manager::{CacheError, CacheStats, CacheStatus};
use super::planner::{InvalidationPlan, MutationEvent};
use super::registry::SiteCaches;

const METRIC_CACHE_BYPASS: &str = "press_cache_bypass_total";
const METRIC_CACHE_WARM_MS: &str = "press_cache_warm_ms";

/// A read result together with how the cache served it.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Value,
    pub cache: CacheStatus,
}

/// Outcome of warming one site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub warmed: usize,
    pub failed: usize,
}

/// Effective cache configuration and counters of one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub site: String,
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: BTreeMap<String, u64>,
    pub classes: BTreeMap<String, TtlClass>,
    pub stats: CacheStats,
}

/// Reads taxonomy, settings and the current user, which nearly every tool
/// call touches.
fn warm_queries() -> [(ResourceType, Query); 4] {
    [
        (ResourceType::Category, Query::list()),
        (ResourceType::Tag, Query::list()),
        (
            ResourceType::Settings,
            Query::single(ResourceId::site_settings()),
        ),
        (ResourceType::User, Query::single(ResourceId::current_user())),
    ]
}

pub struct CachedClient {
    upstream: Arc<dyn ResourceClient>,
    caches: Arc<SiteCaches>,
}

impl CachedClient {
    pub fn new(upstream: Arc<dyn ResourceClient>, config: CacheConfig) -> Self {
        Self::with_caches(upstream, Arc::new(SiteCaches::new(config)))
    }

    pub fn with_caches(upstream: Arc<dyn ResourceClient>, caches: Arc<SiteCaches>) -> Self {
        Self { upstream, caches }
    }

    pub fn caches(&self) -> &Arc<SiteCaches> {
        &self.caches
    }

    fn config(&self) -> &CacheConfig {
        self.caches.config()
    }

    /// Read through the cache with the resource type's configured TTL.
    pub async fn fetch(
        &self,
        site: &SiteId,
        resource: ResourceType,
        query: &Query,
    ) -> Result<Fetched, UpstreamError> {
        let ttl = self.config().ttl.ttl_for(resource);
        self.fetch_with_ttl(site, resource, query, ttl).await
    }

    #[instrument(skip_all, fields(site = %site, resource = %resource))]
    pub async fn fetch_with_ttl(
        &self,
        site: &SiteId,
        resource: ResourceType,
        query: &Query,
        ttl: Duration,
    ) -> Result<Fetched, UpstreamError> {
        if !self.config().enabled {
            return self.direct(site, resource, query, "cache disabled").await;
        }

        let key = match CacheKey::for_query(site, resource, query) {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "Cache key encoding failed");
                return self.direct(site, resource, query, "key encoding failed").await;
            }
        };

        let manager = self.caches.manager(site);
        let upstream = Arc::clone(&self.upstream);
        let task_site = site.clone();
        let task_query = query.clone();
        let lookup = manager
            .get_or_compute(&key, ttl, move || async move {
                upstream.fetch(&task_site, resource, &task_query).await
            })
            .await;

        match lookup {
            Ok(lookup) => {
                debug!(key = %key, status = ?lookup.status, "Cache lookup served");
                Ok(Fetched {
                    value: lookup.value,
                    cache: lookup.status,
                })
            }
            Err(CacheError::Upstream(err)) => Err(err),
            Err(err @ CacheError::Aborted { .. }) => {
                warn!(key = %key, error = %err, "Cache computation lost");
                self.direct(site, resource, query, "computation aborted").await
            }
        }
    }

    async fn direct(
        &self,
        site: &SiteId,
        resource: ResourceType,
        query: &Query,
        reason: &'static str,
    ) -> Result<Fetched, UpstreamError> {
        if self.config().enabled {
            warn!(site = %site, resource = %resource, reason, "Bypassing cache");
        }
        counter!(METRIC_CACHE_BYPASS, "site" => site.to_string()).increment(1);
        let value = self.upstream.fetch(site, resource, query).await?;
        Ok(Fetched {
            value,
            cache: CacheStatus::Bypass,
        })
    }

    /// Forward a write; when the upstream acknowledges it, purge every cached
    /// read it could have made stale before returning.
    #[instrument(
        skip_all,
        fields(site = %site, resource = %resource, operation = %mutation.operation)
    )]
    pub async fn mutate(
        &self,
        site: &SiteId,
        resource: ResourceType,
        mutation: &Mutation,
    ) -> Result<Value, UpstreamError> {
        let value = self.upstream.mutate(site, resource, mutation).await?;

        if !self.config().enabled {
            return Ok(value);
        }

        let event = MutationEvent::new(
            site.clone(),
            resource,
            mutation.operation,
            mutation.id.clone(),
        );
        let plan = match InvalidationPlan::for_mutation(&event) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, "Invalidation plan failed; clearing site cache");
                InvalidationPlan::whole_site(site)
            }
        };

        let manager = self.caches.manager(site);
        let rendered = plan.to_string();
        let removed = manager.invalidate_all(&plan.into_vec());
        info!(plan = %rendered, removed, "Applied invalidation plan");

        Ok(value)
    }

    /// Drop everything cached for `site`.
    pub fn invalidate_all(&self, site: &SiteId) -> usize {
        match self.caches.existing(site) {
            Some(manager) => manager.clear(),
            None => 0,
        }
    }

    /// Drop every cached read of one resource type on `site`.
    pub fn invalidate_resource(&self, site: &SiteId, resource: ResourceType) -> usize {
        let Some(manager) = self.caches.existing(site) else {
            return 0;
        };
        let removed = manager.invalidate(&Purge::resource(site, resource));
        info!(site = %site, resource = %resource, removed, "Resource cache invalidated");
        removed
    }

    pub fn stats(&self, site: &SiteId) -> CacheStats {
        self.caches.stats(site)
    }

    pub fn info(&self, site: &SiteId) -> CacheInfo {
        let config = self.config();
        let ttl_secs = config
            .ttl
            .table()
            .into_iter()
            .map(|(resource, ttl)| (resource.to_string(), ttl.as_secs()))
            .collect();
        let classes = ResourceType::ALL
            .into_iter()
            .map(|resource| (resource.to_string(), TtlClass::of(resource)))
            .collect();
        CacheInfo {
            site: site.to_string(),
            enabled: config.enabled,
            max_entries: config.max_entries_non_zero().get(),
            ttl_secs,
            classes,
            stats: self.stats(site),
        }
    }

    /// Pre-fetch the reads most tool calls start with.
    ///
    /// Failures are counted and logged; warming never fails the caller.
    #[instrument(skip_all, fields(site = %site))]
    pub async fn warm(&self, site: &SiteId) -> WarmReport {
        let mut report = WarmReport::default();
        if !self.config().enabled || !self.config().warm {
            debug!("Cache warming disabled");
            return report;
        }

        let started_at = Instant::now();
        for (resource, query) in warm_queries() {
            match self.fetch(site, resource, &query).await {
                Ok(_) => report.warmed += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(resource = %resource, error = %err, "Warm-up read failed");
                }
            }
        }
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_CACHE_WARM_MS, "site" => site.to_string()).record(elapsed_ms);

        info!(
            warmed = report.warmed,
            failed = report.failed,
            elapsed_ms,
            "Cache warmed"
        );
        report
    }
}
