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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "mirador_cache_hit_total",
            Unit::Count,
            "Total number of cache hits."
        );
        describe_counter!(
            "mirador_cache_miss_total",
            Unit::Count,
            "Total number of cache misses."
        );
        describe_counter!(
            "mirador_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries removed by webhook invalidation."
        );
        describe_counter!(
            "mirador_cache_swept_total",
            Unit::Count,
            "Total number of cache entries removed by the expiry sweep."
        );
        describe_counter!(
            "mirador_events_delivered_total",
            Unit::Count,
            "Total number of change events delivered to live connections."
        );
        describe_counter!(
            "mirador_events_dropped_total",
            Unit::Count,
            "Total number of change events dropped for lack of a live connection."
        );
        describe_gauge!(
            "mirador_live_connections",
            Unit::Count,
            "Current number of registered live connections."
        );
        describe_histogram!(
            "mirador_replay_ms",
            Unit::Milliseconds,
            "Missed-event replay latency in milliseconds."
        );
    });
}
