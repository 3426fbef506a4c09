//! Configuration layer: typed settings with layered precedence (defaults → file → env).

use std::{
    collections::BTreeMap, num::NonZeroUsize, path::Path, str::FromStr, time::Duration,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::{ResourceType, SiteId};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "press-cache";
const ENV_PREFIX: &str = "PRESS_CACHE";
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: NonZeroUsize,
    /// TTL overrides; resource types not listed keep their class default.
    pub ttl: BTreeMap<ResourceType, Duration>,
    pub warm: bool,
    pub sites: Vec<SiteId>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
///
/// `config_file`, when given, must exist and overrides the default files.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.sites")
            .try_parsing(true),
    );

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    // Zero capacity is clamped rather than rejected.
    let max_entries = NonZeroUsize::new(cache.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES))
        .unwrap_or(NonZeroUsize::MIN);

    let mut ttl = BTreeMap::new();
    for (name, seconds) in cache.ttl {
        let resource = ResourceType::from_str(name.trim()).map_err(|err| {
            LoadError::invalid("cache.ttl", format!("unknown resource `{name}`: {err}"))
        })?;
        ttl.insert(resource, Duration::from_secs(seconds));
    }

    let mut sites = Vec::with_capacity(cache.sites.len());
    for name in cache.sites {
        let site = SiteId::new(name.trim())
            .map_err(|err| LoadError::invalid("cache.sites", err.to_string()))?;
        if !sites.contains(&site) {
            sites.push(site);
        }
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        max_entries,
        ttl,
        warm: cache.warm.unwrap_or(true),
        sites,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    max_entries: Option<usize>,
    ttl: BTreeMap<String, u64>,
    warm: Option<bool>,
    sites: Vec<String>,
}
