//! Storage webhook ingestion.

use axum::{extract::State, http::StatusCode};
use bytes::Bytes;
use mirador_api_types::StorageNotification;
use tracing::{debug, info};

use super::AppState;

/// `POST /hooks/storage`. Always answers 204: the notification source only
/// retries on non-2xx, and a malformed or unrecognized notification will
/// never become valid by retrying.
pub async fn storage_hook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<StorageNotification>(&body) {
        Ok(notification) => {
            info!(
                target = "mirador::http",
                event = %notification.event,
                key = %notification.key,
                "Storage notification received"
            );
            state.invalidation.handle(&notification);
        }
        Err(err) => {
            debug!(
                target = "mirador::http",
                error = %err,
                "Ignoring malformed storage notification"
            );
        }
    }
    StatusCode::NO_CONTENT
}
