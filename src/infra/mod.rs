//! Runtime bootstrap: settings loading and telemetry.

use std::path::Path;

use tracing::info;

use crate::config::{self, Settings};

pub mod error;
pub mod telemetry;

use error::InfraError;

/// Load settings and install the tracing subscriber.
///
/// Call once per process before building a `CachedClient`.
pub fn bootstrap(config_file: Option<&Path>) -> Result<Settings, InfraError> {
    let settings = config::load(config_file)?;
    telemetry::init(&settings.logging)?;
    info!(
        enabled = settings.cache.enabled,
        max_entries = settings.cache.max_entries.get(),
        sites = settings.cache.sites.len(),
        "Cache settings loaded"
    );
    Ok(settings)
}
