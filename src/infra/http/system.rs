//! Operational endpoints: cache statistics and health.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mirador_api_types::CacheStatsSnapshot;
use time::OffsetDateTime;

use crate::application::error::AppError;
use crate::cache::metrics;

use super::AppState;

/// `GET /api/system/cache-stats`. A point-in-time, read-only snapshot;
/// assembling it never mutates cache state or the hit/miss counters.
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsSnapshot> {
    Json(metrics::collect(
        &state.store,
        state.hub.connection_counts(),
        OffsetDateTime::now_utc(),
    ))
}

/// `GET /healthz`. Reports the object store's reachability.
pub async fn healthz(State(state): State<AppState>) -> Response {
    match state.objects.health().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}
