//! Press Cache System
//!
//! Read-through caching for a multi-site publishing REST API:
//!
//! - **Reads** are keyed canonically per site and served from a bounded LRU
//!   store with per-resource TTLs; concurrent misses share one upstream call.
//! - **Writes** are forwarded upstream and, once acknowledged, purge every
//!   cached read they could have made stale.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `press-cache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 1000
//! warm = true
//! sites = ["blog", "shop"]
//!
//! [cache.ttl]
//! post = 300
//! # ... see config.rs for class defaults
//! ```

mod client;
mod config;
mod keys;
mod lock;
mod manager;
mod planner;
mod registry;
mod store;

pub use client::{CacheInfo, CachedClient, Fetched, WarmReport};
pub use config::{CacheConfig, TtlClass, TtlPolicy};
pub use keys::{CacheKey, KeyError, PatternKey, Purge, canonical_params, encode_params};
pub use manager::{CacheError, CacheStats, CacheStatus, Lookup, Manager};
pub use planner::{InvalidationError, InvalidationPlan, MutationEvent, dependents};
pub use registry::SiteCaches;
pub use store::{Store, StoreStats};
