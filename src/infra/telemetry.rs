use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_ENTRIES, METRIC_CACHE_EXPIRED, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_PERSIST_ERROR, METRIC_REQUEST_COALESCED,
};
use crate::client::METRIC_REQUEST_MS;
use crate::config::{LogFormat, LoggingSettings};
use crate::swr::METRIC_REVALIDATE_FAILED;

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Events go to stderr; stdout carries command output only.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
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
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of reads answered by a valid cache entry."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of reads that found no entry."
        );
        describe_counter!(
            METRIC_CACHE_EXPIRED,
            Unit::Count,
            "Total number of entries dropped because their TTL had elapsed."
        );
        describe_counter!(
            METRIC_REQUEST_COALESCED,
            Unit::Count,
            "Total number of requests that joined one already in flight."
        );
        describe_counter!(
            METRIC_PERSIST_ERROR,
            Unit::Count,
            "Total number of failed writes or reads of the persisted cache."
        );
        describe_counter!(
            METRIC_REVALIDATE_FAILED,
            Unit::Count,
            "Total number of background revalidations that failed."
        );
        describe_gauge!(
            METRIC_CACHE_ENTRIES,
            Unit::Count,
            "Current number of entries held by the cache store."
        );
        describe_histogram!(
            METRIC_REQUEST_MS,
            Unit::Milliseconds,
            "Network round-trip latency of API requests in milliseconds."
        );
    });
}
