//! Cache configuration.
//!
//! Capacity and TTL policy applied to every site's store, resolved from the
//! `[cache]` section of `press-cache.toml`.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Serialize;

use crate::domain::types::{ResourceType, SiteId};

// Default values for cache configuration
const DEFAULT_MAX_ENTRIES: usize = 1000;
const STATIC_TTL: Duration = Duration::from_secs(4 * 60 * 60);
const SEMI_STATIC_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const DYNAMIC_TTL: Duration = Duration::from_secs(15 * 60);

/// Volatility class of a resource type, which picks its default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Rarely changes: site settings, user profiles.
    Static,
    /// Changes with editorial work: categories, tags.
    SemiStatic,
    /// Changes constantly: posts, pages, media, comments.
    Dynamic,
}

impl TtlClass {
    pub fn of(resource: ResourceType) -> Self {
        match resource {
            ResourceType::Settings | ResourceType::User => TtlClass::Static,
            ResourceType::Category | ResourceType::Tag => TtlClass::SemiStatic,
            ResourceType::Post | ResourceType::Page | ResourceType::Media | ResourceType::Comment => {
                TtlClass::Dynamic
            }
        }
    }

    pub fn default_ttl(self) -> Duration {
        match self {
            TtlClass::Static => STATIC_TTL,
            TtlClass::SemiStatic => SEMI_STATIC_TTL,
            TtlClass::Dynamic => DYNAMIC_TTL,
        }
    }
}

/// Per-resource-type TTL table: class defaults plus configured overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TtlPolicy {
    overrides: BTreeMap<ResourceType, Duration>,
}

impl TtlPolicy {
    pub fn with_override(mut self, resource: ResourceType, ttl: Duration) -> Self {
        self.overrides.insert(resource, ttl);
        self
    }

    pub fn ttl_for(&self, resource: ResourceType) -> Duration {
        self.overrides
            .get(&resource)
            .copied()
            .unwrap_or_else(|| TtlClass::of(resource).default_ttl())
    }

    /// The effective TTL of every resource type.
    pub fn table(&self) -> BTreeMap<ResourceType, Duration> {
        ResourceType::ALL
            .into_iter()
            .map(|resource| (resource, self.ttl_for(resource)))
            .collect()
    }
}

/// Cache configuration shared by all sites.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Route reads through the cache; when false every read goes upstream.
    pub enabled: bool,
    /// Maximum entries held per site.
    pub max_entries: usize,
    /// TTL applied per resource type.
    pub ttl: TtlPolicy,
    /// Pre-fetch warm-up queries when a site is warmed.
    pub warm: bool,
    /// Sites whose caches are created at startup.
    pub sites: Vec<SiteId>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: TtlPolicy::default(),
            warm: true,
            sites: Vec::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        let ttl = settings
            .ttl
            .iter()
            .fold(TtlPolicy::default(), |policy, (resource, ttl)| {
                policy.with_override(*resource, *ttl)
            });
        Self {
            enabled: settings.enabled,
            max_entries: settings.max_entries.get(),
            ttl,
            warm: settings.warm,
            sites: settings.sites.clone(),
        }
    }
}

impl CacheConfig {
    /// Returns the per-site capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
