//! Dashboard data reads.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::Value;

use crate::cache::keys::CachePrefix;

use super::AppState;

/// `GET /api/data/{module}/{platform}/{subscriber}`. Serves the artifact
/// list through the cache; degraded reads come back as stale data or an
/// empty list, never an error.
pub async fn module_data(
    State(state): State<AppState>,
    Path((module, platform, subscriber)): Path<(String, String, String)>,
) -> Json<Vec<Value>> {
    let prefix = CachePrefix::new(&module, &platform, &subscriber);
    Json(state.reads.fetch(&prefix).await)
}
