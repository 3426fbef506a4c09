//! Bounded, TTL-aware entry table for one site.
//!
//! Entries live in an [`LruCache`] behind a mutex; every operation is one
//! critical section. Expiry is evaluated lazily on access, eviction on insert.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::types::SiteId;

use super::keys::Purge;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "press_cache_hit_total";
const METRIC_CACHE_MISS: &str = "press_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "press_cache_evict_total";
const METRIC_CACHE_EXPIRED: &str = "press_cache_expired_total";

struct CacheEntry {
    value: Value,
    created_at: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
    last_accessed_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time counters of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Key → entry table owned by exactly one site.
pub struct Store {
    site: SiteId,
    entries: Mutex<LruCache<String, CacheEntry>>,
    counters: Counters,
}

impl Store {
    pub fn new(site: SiteId, capacity: NonZeroUsize) -> Self {
        Self {
            site,
            entries: Mutex::new(LruCache::new(capacity)),
            counters: Counters::default(),
        }
    }

    pub fn site(&self) -> &SiteId {
        &self.site
    }

    /// Look up a live entry, refreshing its recency.
    ///
    /// An entry past its expiry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        let expired = match entries.get_mut(key) {
            None => false,
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                debug!(
                    site = %self.site,
                    key,
                    age_ms = now.duration_since(entry.created_at).as_millis() as u64,
                    idle_ms = now.duration_since(entry.last_accessed_at).as_millis() as u64,
                    "Cache hit"
                );
                entry.last_accessed_at = now;
                let value = entry.value.clone();
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_CACHE_HIT, "site" => self.site.to_string()).increment(1);
                return Some(value);
            }
        };

        if expired {
            entries.pop(key);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_EXPIRED, "site" => self.site.to_string()).increment(1);
            debug!(site = %self.site, key, "Cache entry expired");
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS, "site" => self.site.to_string()).increment(1);
        None
    }

    /// Insert or fully overwrite an entry.
    ///
    /// Returns the key evicted to stay within capacity, if any.
    pub fn set(&self, key: String, value: Value, ttl: Duration) -> Option<String> {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now.checked_add(ttl),
            last_accessed_at: now,
        };

        let mut entries = mutex_lock(&self.entries, SOURCE, "set");
        let displaced = entries.push(key.clone(), entry);
        drop(entries);

        match displaced {
            Some((displaced_key, _)) if displaced_key != key => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_CACHE_EVICT, "site" => self.site.to_string()).increment(1);
                debug!(site = %self.site, evicted = %displaced_key, "Cache entry evicted");
                Some(displaced_key)
            }
            _ => None,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        mutex_lock(&self.entries, SOURCE, "delete")
            .pop(key)
            .is_some()
    }

    /// Remove every entry the purge target covers; returns the number removed.
    ///
    /// A target naming another site removes nothing.
    pub fn delete_matching(&self, purge: &Purge) -> usize {
        if purge.site() != &self.site {
            warn!(
                site = %self.site,
                purge_site = %purge.site(),
                purge = %purge,
                "Rejected cross-site purge"
            );
            return 0;
        }

        let mut entries = mutex_lock(&self.entries, SOURCE, "delete_matching");
        if matches!(purge, Purge::Site(_)) {
            let removed = entries.len();
            entries.clear();
            return removed;
        }

        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| purge.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "clear");
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "capacity").cap().get()
    }

    pub fn stats(&self) -> StoreStats {
        let (size, capacity) = {
            let entries = mutex_lock(&self.entries, SOURCE, "stats");
            (entries.len(), entries.cap().get())
        };
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            size,
            capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use serde_json::json;

    use super::*;
    use crate::domain::types::ResourceType;

    const MINUTE: Duration = Duration::from_secs(60);

    fn store(capacity: usize) -> Store {
        Store::new(
            SiteId::new("blog").expect("valid site"),
            NonZeroUsize::new(capacity).expect("non-zero"),
        )
    }

    #[test]
    fn get_after_set_returns_value() {
        let store = store(4);
        assert!(store.get("blog:post:1").is_none());

        store.set("blog:post:1".to_string(), json!({"id": 1}), MINUTE);

        assert_eq!(store.get("blog:post:1"), Some(json!({"id": 1})));
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn touching_an_entry_protects_it_from_eviction() {
        let store = store(2);
        store.set("A".to_string(), json!("a"), MINUTE);
        store.set("B".to_string(), json!("b"), MINUTE);
        assert!(store.get("A").is_some());

        let evicted = store.set("C".to_string(), json!("c"), MINUTE);

        assert_eq!(evicted.as_deref(), Some("B"));
        assert!(store.get("A").is_some());
        assert!(store.get("B").is_none());
        assert!(store.get("C").is_some());
        assert_eq!(store.stats().evictions, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn untouched_entries_evict_in_insertion_order() {
        let store = store(2);
        store.set("A".to_string(), json!(1), MINUTE);
        store.set("B".to_string(), json!(2), MINUTE);

        assert_eq!(store.set("C".to_string(), json!(3), MINUTE).as_deref(), Some("A"));
        assert_eq!(store.set("D".to_string(), json!(4), MINUTE).as_deref(), Some("B"));
    }

    #[test]
    fn overwrite_is_not_an_eviction() {
        let store = store(2);
        store.set("A".to_string(), json!(1), MINUTE);
        assert!(store.set("A".to_string(), json!(2), MINUTE).is_none());
        assert_eq!(store.get("A"), Some(json!(2)));
        assert_eq!(store.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_report_a_miss() {
        let store = store(4);
        store.set("k".to_string(), json!("v"), Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(store.get("k").is_some());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(store.get("k").is_none());
        assert!(store.is_empty());

        let stats = store.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_ttl_never_expires() {
        let store = store(4);
        assert!(
            store
                .set("k".to_string(), json!("v"), Duration::MAX)
                .is_none()
        );

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;

        assert_eq!(store.get("k"), Some(json!("v")));
        assert_eq!(store.stats().expirations, 0);
    }

    #[test]
    fn delete_matching_removes_only_covered_keys() {
        let store = store(8);
        let blog = SiteId::new("blog").expect("valid site");
        store.set("blog:post:42".to_string(), json!(1), MINUTE);
        store.set("blog:post:list:{}".to_string(), json!([]), MINUTE);
        store.set(r#"blog:post:list:{"page":2}"#.to_string(), json!([]), MINUTE);
        store.set("blog:page:list:{}".to_string(), json!([]), MINUTE);

        let removed = store.delete_matching(&Purge::collection(&blog, ResourceType::Post));

        assert_eq!(removed, 2);
        assert!(store.get("blog:post:42").is_some());
        assert!(store.get("blog:page:list:{}").is_some());
    }

    #[test]
    fn purge_for_another_site_is_rejected() {
        let store = store(4);
        store.set("blog:post:1".to_string(), json!(1), MINUTE);

        let shop = SiteId::new("shop").expect("valid site");
        assert_eq!(store.delete_matching(&Purge::Site(shop)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn site_purge_clears_everything() {
        let store = store(4);
        store.set("blog:post:1".to_string(), json!(1), MINUTE);
        store.set("blog:tag:2".to_string(), json!(2), MINUTE);

        let blog = SiteId::new("blog").expect("valid site");
        assert_eq!(store.delete_matching(&Purge::Site(blog)), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = store(4);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .lock()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.set("k".to_string(), json!(1), MINUTE);
        assert!(store.get("k").is_some());
    }
}
