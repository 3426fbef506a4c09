//! Per-site cache registry.
//!
//! Each site owns its own `Manager` and `Store`, so eviction pressure,
//! invalidation and statistics of one site can never touch another.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::domain::types::SiteId;

use super::config::CacheConfig;
use super::manager::{CacheStats, Manager};

/// Registry of site caches with an explicit lifecycle.
///
/// Configured sites are created up front; other sites are created on first
/// use. `teardown` and `shutdown` drop the stores.
pub struct SiteCaches {
    config: CacheConfig,
    sites: DashMap<SiteId, Arc<Manager>>,
}

impl SiteCaches {
    pub fn new(config: CacheConfig) -> Self {
        let sites = DashMap::new();
        for site in &config.sites {
            sites.insert(site.clone(), Arc::new(Manager::new(site.clone(), &config)));
        }
        info!(
            sites = sites.len(),
            max_entries = config.max_entries,
            enabled = config.enabled,
            "Site caches initialised"
        );
        Self { config, sites }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The cache of `site`, creating it on first use.
    pub fn manager(&self, site: &SiteId) -> Arc<Manager> {
        if let Some(existing) = self.sites.get(site) {
            return Arc::clone(existing.value());
        }
        let entry = self.sites.entry(site.clone()).or_insert_with(|| {
            info!(site = %site, "Site cache registered");
            Arc::new(Manager::new(site.clone(), &self.config))
        });
        Arc::clone(entry.value())
    }

    /// The cache of `site` only if it already exists.
    pub fn existing(&self, site: &SiteId) -> Option<Arc<Manager>> {
        self.sites.get(site).map(|entry| Arc::clone(entry.value()))
    }

    /// Counters of `site`; an unknown site reports an empty cache and stays unknown.
    pub fn stats(&self, site: &SiteId) -> CacheStats {
        match self.existing(site) {
            Some(manager) => manager.stats(),
            None => CacheStats::empty(self.config.max_entries_non_zero().get()),
        }
    }

    /// Clear one site's entries and drop its cache; returns the entries removed.
    pub fn teardown(&self, site: &SiteId) -> usize {
        match self.sites.remove(site) {
            Some((_, manager)) => {
                let removed = manager.clear();
                info!(site = %site, removed, "Site cache torn down");
                removed
            }
            None => 0,
        }
    }

    /// Tear down every site.
    pub fn shutdown(&self) -> usize {
        let sites: Vec<SiteId> = self.sites.iter().map(|entry| entry.key().clone()).collect();
        sites.iter().map(|site| self.teardown(site)).sum()
    }

    pub fn sites(&self) -> Vec<SiteId> {
        let mut sites: Vec<SiteId> = self.sites.iter().map(|entry| entry.key().clone()).collect();
        sites.sort();
        sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::cache::keys::CacheKey;
    use crate::domain::types::{ResourceId, ResourceType};

    fn site(name: &str) -> SiteId {
        SiteId::new(name).expect("valid site")
    }

    async fn populate(manager: &Manager, id: u64) {
        let key = CacheKey::single(
            manager.site(),
            ResourceType::Post,
            &ResourceId::from(id),
            &Value::Null,
        )
        .expect("key");
        manager
            .get_or_compute(&key, Duration::from_secs(60), move || async move {
                Ok(json!(id))
            })
            .await
            .expect("computed");
    }

    #[test]
    fn configured_sites_exist_at_startup() {
        let caches = SiteCaches::new(CacheConfig {
            sites: vec![site("blog"), site("shop")],
            ..Default::default()
        });
        assert_eq!(caches.sites(), vec![site("blog"), site("shop")]);
        assert!(caches.existing(&site("news")).is_none());
    }

    #[test]
    fn manager_is_created_once_per_site() {
        let caches = SiteCaches::new(CacheConfig::default());
        let first = caches.manager(&site("blog"));
        let second = caches.manager(&site("blog"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(caches.len(), 1);
    }

    #[test]
    fn stats_for_unknown_site_do_not_register_it() {
        let caches = SiteCaches::new(CacheConfig {
            max_entries: 5,
            ..Default::default()
        });

        let stats = caches.stats(&site("news"));

        assert_eq!(stats.size, 0);
        assert_eq!(stats.capacity, 5);
        assert_eq!(stats.hits, 0);
        assert!(caches.existing(&site("news")).is_none());
        assert!(caches.is_empty());
    }

    #[tokio::test]
    async fn eviction_pressure_stays_within_a_site() {
        let caches = SiteCaches::new(CacheConfig {
            max_entries: 2,
            ..Default::default()
        });
        let blog = caches.manager(&site("blog"));
        let shop = caches.manager(&site("shop"));

        populate(&shop, 1).await;
        for id in 0..10 {
            populate(&blog, id).await;
        }

        assert_eq!(shop.stats().size, 1);
        assert_eq!(shop.stats().evictions, 0);
        assert_eq!(blog.stats().size, 2);
    }

    #[tokio::test]
    async fn teardown_removes_only_that_site() {
        let caches = SiteCaches::new(CacheConfig::default());
        populate(&caches.manager(&site("blog")), 1).await;
        populate(&caches.manager(&site("shop")), 1).await;

        assert_eq!(caches.teardown(&site("blog")), 1);
        assert_eq!(caches.teardown(&site("blog")), 0);
        assert_eq!(caches.stats(&site("shop")).size, 1);

        assert_eq!(caches.shutdown(), 1);
        assert!(caches.is_empty());
    }
}
