//! Missed-event replay on reconnect.
//!
//! A client reconnecting with a `since` watermark gets every event it missed
//! while disconnected, streamed in timestamp order before live delivery
//! takes over. Replay is best-effort per object: one unreadable historical
//! record never fails the whole connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use mirador_api_types::{Envelope, unix_millis};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cache::keys::ArtifactKey;
use crate::infra::objstore::ObjectStore;
use crate::stream::Connection;

/// Default delay between replayed events, so a large backlog does not
/// overwhelm the client.
pub const DEFAULT_REPLAY_PACING: Duration = Duration::from_millis(50);

/// Default storage modules scanned for replayable events.
pub const DEFAULT_EVENT_MODULES: &[&str] = &["events"];

struct MissedEvent {
    timestamp: i64,
    key: String,
    payload: Value,
}

pub struct ReplayService {
    objects: Arc<dyn ObjectStore>,
    /// Extra identity aliases per subscriber; a platform id and a display
    /// name may both address the same logical subscriber.
    aliases: HashMap<String, Vec<String>>,
    event_modules: Vec<String>,
    pacing: Duration,
}

impl ReplayService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        aliases: HashMap<String, Vec<String>>,
        event_modules: Vec<String>,
        pacing: Duration,
    ) -> Self {
        Self {
            objects,
            aliases,
            event_modules,
            pacing,
        }
    }

    /// All storage identities the subscriber's events may be filed under.
    fn identities(&self, subscriber_id: &str) -> Vec<String> {
        let mut identities = vec![subscriber_id.to_string()];
        if let Some(extra) = self.aliases.get(subscriber_id) {
            for alias in extra {
                if !identities.contains(alias) {
                    identities.push(alias.clone());
                }
            }
        }
        identities
    }

    /// Stream every missed event newer than `since` (unix millis) to the
    /// connection, oldest first, bracketed by summary and terminator
    /// envelopes. Returns the number of events actually delivered.
    pub async fn replay(&self, connection: &Connection, since: i64) -> usize {
        let started = Instant::now();
        let now = OffsetDateTime::now_utc();
        let mut missed = self.collect(connection.subscriber_id(), since).await;
        missed.sort_by(|a, b| (a.timestamp, &a.key).cmp(&(b.timestamp, &b.key)));

        let summary = Envelope::MissedEventsSummary {
            timestamp: unix_millis(now),
            count: missed.len(),
            window_start: since,
            window_end: unix_millis(now),
        };
        if !connection.deliver(summary).await {
            return 0;
        }

        let mut delivered = 0;
        for event in missed {
            if !connection.mark_delivered(&event.key) {
                debug!(
                    target = "mirador::replay",
                    key = %event.key,
                    "Skipping event already delivered live"
                );
                continue;
            }
            let envelope = Envelope::MissedEvent {
                timestamp: event.timestamp,
                key: event.key,
                payload: event.payload,
            };
            if !connection.deliver(envelope).await {
                return delivered;
            }
            delivered += 1;
            tokio::time::sleep(self.pacing).await;
        }

        let terminator = Envelope::MissedEventsEnd {
            timestamp: unix_millis(OffsetDateTime::now_utc()),
            delivered,
        };
        let _ = connection.deliver(terminator).await;

        histogram!("mirador_replay_ms").record(started.elapsed().as_millis() as f64);
        info!(
            target = "mirador::replay",
            subscriber_id = connection.subscriber_id(),
            connection_id = %connection.id(),
            since,
            delivered,
            "Replay completed"
        );
        delivered
    }

    /// Gather candidate events across all event modules and identities.
    /// Listing failures skip the module; fetch/parse failures skip the
    /// object.
    async fn collect(&self, subscriber_id: &str, since: i64) -> Vec<MissedEvent> {
        let identities = self.identities(subscriber_id);
        let mut missed = Vec::new();

        for module in &self.event_modules {
            let keys = match self.objects.list(module).await {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(
                        target = "mirador::replay",
                        module, error = %err,
                        "Listing failed; skipping module"
                    );
                    continue;
                }
            };

            for raw_key in keys {
                let Some(key) = ArtifactKey::parse(&raw_key) else {
                    continue;
                };
                if !identities.iter().any(|identity| identity == &key.subscriber) {
                    continue;
                }

                let object = match self.objects.get(&raw_key).await {
                    Ok(object) => object,
                    Err(err) => {
                        debug!(
                            target = "mirador::replay",
                            key = %raw_key, error = %err,
                            "Skipping unreadable historical event"
                        );
                        continue;
                    }
                };
                let payload = match serde_json::from_slice::<Value>(&object.data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        debug!(
                            target = "mirador::replay",
                            key = %raw_key, error = %err,
                            "Skipping unparsable historical event"
                        );
                        continue;
                    }
                };

                let timestamp = payload
                    .get("timestamp")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(|| unix_millis(object.last_modified));
                if timestamp > since {
                    missed.push(MissedEvent {
                        timestamp,
                        key: raw_key,
                        payload,
                    });
                }
            }
        }

        missed
    }
}
