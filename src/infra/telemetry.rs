use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every cache metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "press_cache_hit_total",
            Unit::Count,
            "Total number of cache lookups served from a live entry."
        );
        describe_counter!(
            "press_cache_miss_total",
            Unit::Count,
            "Total number of cache lookups that found no live entry."
        );
        describe_counter!(
            "press_cache_evict_total",
            Unit::Count,
            "Total number of entries evicted due to capacity."
        );
        describe_counter!(
            "press_cache_expired_total",
            Unit::Count,
            "Total number of entries dropped on access after their TTL."
        );
        describe_counter!(
            "press_cache_coalesced_total",
            Unit::Count,
            "Total number of lookups that joined an in-flight computation."
        );
        describe_counter!(
            "press_cache_bypass_total",
            Unit::Count,
            "Total number of reads sent straight to the upstream."
        );
        describe_counter!(
            "press_cache_invalidated_total",
            Unit::Count,
            "Total number of entries removed by invalidation."
        );
        describe_histogram!(
            "press_cache_warm_ms",
            Unit::Milliseconds,
            "Cache warm phase latency in milliseconds."
        );
    });
}
