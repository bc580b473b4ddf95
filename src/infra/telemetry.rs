use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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

/// Register descriptions for every metric the cache and HTTP layer emit.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "viewcache_hit_total",
            Unit::Count,
            "Reads answered from a live cache entry."
        );
        describe_counter!(
            "viewcache_miss_total",
            Unit::Count,
            "Reads that found no live entry and awaited a fetch."
        );
        describe_counter!(
            "viewcache_stale_served_total",
            Unit::Count,
            "Expired entries served because the refill failed."
        );
        describe_counter!(
            "viewcache_evict_total",
            Unit::Count,
            "Entries removed by capacity pruning."
        );
        describe_counter!(
            "viewcache_eviction_starvation_total",
            Unit::Count,
            "Prunes that left the cache over capacity because only priority entries remained."
        );
        describe_counter!(
            "viewcache_prefetch_total",
            Unit::Count,
            "Background prefetches by outcome."
        );
        describe_histogram!(
            "viewcache_fetch_ms",
            Unit::Milliseconds,
            "Fetch function latency in milliseconds."
        );
        describe_histogram!(
            "viewcache_warm_ms",
            Unit::Milliseconds,
            "Warm tier latency in milliseconds."
        );
        describe_gauge!(
            "viewcache_entries",
            Unit::Count,
            "Entries currently held by the cache."
        );
        describe_counter!(
            "viewcache_http_not_modified_total",
            Unit::Count,
            "Conditional reads answered with 304 Not Modified."
        );
    });
}
