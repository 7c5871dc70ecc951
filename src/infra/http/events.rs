//! Live event stream endpoint.
//!
//! `GET /events/{subscriber_id}` opens a newline-delimited JSON stream of
//! envelopes. A `since` query parameter (unix milliseconds) marks the request
//! as a reconnect: the client gets a `reconnection` acknowledgement and a
//! background replay of everything it missed, interleaved with live events.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mirador_api_types::{Envelope, unix_millis};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::error;

use crate::stream::{BroadcastHub, Connection};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Watermark of the last event the client saw, in unix milliseconds.
    pub since: Option<i64>,
}

/// Unregisters the connection when the response body is dropped. Client
/// disconnects surface as a body drop, so this is the one cleanup path for
/// every way a stream can end.
struct StreamGuard {
    hub: Arc<BroadcastHub>,
    connection: Arc<Connection>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.connection);
    }
}

pub async fn subscribe(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let (connection, mut receiver) = state.hub.register(&subscriber_id);

    if let Some(since) = query.since {
        let ack = Envelope::Reconnection {
            timestamp: unix_millis(OffsetDateTime::now_utc()),
            connection_id: connection.id(),
            since,
        };
        // The channel was just created; a failed write here means the
        // client is already gone and the guard below cleans up.
        let _ = connection.try_deliver(ack);

        let replay = state.replay.clone();
        let replaying = connection.clone();
        tokio::spawn(async move {
            replay.replay(&replaying, since).await;
        });
    }

    let guard = StreamGuard {
        hub: state.hub.clone(),
        connection,
    };
    let body = stream! {
        let _guard = guard;
        while let Some(envelope) = receiver.recv().await {
            match serde_json::to_vec(&envelope) {
                Ok(mut line) => {
                    line.push(b'\n');
                    yield Ok::<Bytes, Infallible>(Bytes::from(line));
                }
                Err(err) => {
                    error!(
                        target = "mirador::http",
                        error = %err,
                        "Failed to serialize envelope; skipping"
                    );
                }
            }
        }
    };

    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
