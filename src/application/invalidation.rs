//! Webhook-driven cache invalidation.
//!
//! The object store reports external writes as `{event, key}` notifications.
//! A well-shaped key invalidates its cache prefix and fans a change event
//! out to the subscriber's live connections; anything else is silently
//! ignored — the notification source has no reliable failure channel, so
//! malformed input is a no-op rather than an error.

use std::sync::Arc;

use mirador_api_types::StorageNotification;
use serde_json::json;
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::CacheStore;
use crate::cache::keys::ArtifactKey;
use crate::stream::{BroadcastHub, ChangeEvent};

pub struct InvalidationService {
    store: Arc<CacheStore>,
    hub: Arc<BroadcastHub>,
}

impl InvalidationService {
    pub fn new(store: Arc<CacheStore>, hub: Arc<BroadcastHub>) -> Self {
        Self { store, hub }
    }

    /// Process one change notification.
    ///
    /// Invalidation always happens before the broadcast publish, so a client
    /// acting on the push can never be handed the entry the push is about.
    pub fn handle(&self, notification: &StorageNotification) {
        let Some(key) = ArtifactKey::parse(&notification.key) else {
            debug!(
                target = "mirador::invalidation",
                key = %notification.key,
                event = %notification.event,
                "Ignoring notification with unrecognized key shape"
            );
            return;
        };

        let prefix = key.prefix();
        self.store.invalidate(&prefix);

        let event = ChangeEvent {
            subscriber_id: key.subscriber.clone(),
            cache_key: prefix,
            timestamp: OffsetDateTime::now_utc(),
            payload: json!({ "key": notification.key }),
            token: notification.key.clone(),
        };
        self.hub.publish(&event);
    }
}
