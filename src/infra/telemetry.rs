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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "presto_page_cache_hit_total",
            Unit::Count,
            "Pages served straight from the page cache."
        );
        describe_counter!(
            "presto_page_cache_miss_total",
            Unit::Count,
            "Eligible requests with no cache entry."
        );
        describe_counter!(
            "presto_page_cache_expired_total",
            Unit::Count,
            "Entries found past their lifetime and deleted on read."
        );
        describe_counter!(
            "presto_page_cache_bypass_total",
            Unit::Count,
            "Requests the eligibility gate kept away from the cache."
        );
        describe_counter!(
            "presto_page_cache_write_total",
            Unit::Count,
            "Pages written to the cache."
        );
        describe_counter!(
            "presto_page_cache_write_failed_total",
            Unit::Count,
            "Cache writes that failed at the storage layer."
        );
        describe_counter!(
            "presto_page_cache_invalidated_total",
            Unit::Count,
            "Entries removed by content invalidation."
        );
        describe_histogram!(
            "presto_page_cache_lookup_ms",
            Unit::Milliseconds,
            "Page cache read path latency in milliseconds."
        );
    });
}
