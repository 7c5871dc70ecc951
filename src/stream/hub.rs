//! Broadcast hub: subscriber → live connections registry and event fanout.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use metrics::{counter, gauge};
use mirador_api_types::{Envelope, unix_millis};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::keys::CachePrefix;
use crate::cache::{rw_read, rw_write};

use super::connection::Connection;

const SOURCE: &str = "stream::hub";

/// Default per-connection output channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A change to a subscriber's cached data, produced by invalidation and
/// fanned out to every live connection of that subscriber.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub subscriber_id: String,
    pub cache_key: CachePrefix,
    pub timestamp: OffsetDateTime,
    /// The raw storage key that changed, wrapped for the wire.
    pub payload: Value,
    /// Storage key recorded at each connection so a concurrent replay skips
    /// events the client already saw live.
    pub token: String,
}

impl ChangeEvent {
    pub fn envelope(&self) -> Envelope {
        Envelope::Update {
            timestamp: unix_millis(self.timestamp),
            subscriber_id: self.subscriber_id.clone(),
            cache_key: self.cache_key.to_string(),
            payload: self.payload.clone(),
        }
    }
}

/// Registry of live connections and the sole fanout path to them.
///
/// A connection appears under exactly one subscriber; removing the last
/// connection for a subscriber drops the subscriber's registry entry
/// entirely.
pub struct BroadcastHub {
    connections: RwLock<HashMap<String, Vec<Arc<Connection>>>>,
    channel_capacity: usize,
}

impl BroadcastHub {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            channel_capacity,
        }
    }

    /// Create and register a connection for a subscriber.
    ///
    /// The initial `connection` envelope is written before the connection is
    /// published to the registry, so it is always the first thing a client
    /// reads.
    pub fn register(&self, subscriber_id: &str) -> (Arc<Connection>, mpsc::Receiver<Envelope>) {
        let (connection, receiver) = Connection::new(subscriber_id, self.channel_capacity);
        let connection = Arc::new(connection);

        let hello = Envelope::Connection {
            timestamp: unix_millis(OffsetDateTime::now_utc()),
            connection_id: connection.id(),
            subscriber_id: subscriber_id.to_string(),
        };
        // Channel is freshly created; the only way this fails is a dropped
        // receiver, which cannot happen before we hand it out.
        let _ = connection.try_deliver(hello);

        rw_write(&self.connections, SOURCE, "register")
            .entry(subscriber_id.to_string())
            .or_default()
            .push(connection.clone());

        gauge!("mirador_live_connections").increment(1.0);
        info!(
            target = "mirador::stream",
            subscriber_id,
            connection_id = %connection.id(),
            "Connection registered"
        );

        (connection, receiver)
    }

    /// Deliver a change event to every live connection of its subscriber.
    ///
    /// Write failures evict the failed connection only; nothing is raised to
    /// the caller. Events for subscribers with no live connection are
    /// dropped — durability comes from read-through plus replay-on-reconnect,
    /// not from a persistent outbox.
    pub fn publish(&self, event: &ChangeEvent) {
        let targets = self.subscriber_connections(&event.subscriber_id);
        if targets.is_empty() {
            counter!("mirador_events_dropped_total").increment(1);
            debug!(
                target = "mirador::stream",
                subscriber_id = %event.subscriber_id,
                cache_key = %event.cache_key,
                "No live connections; event dropped"
            );
            return;
        }

        let envelope = event.envelope();
        let mut failed = Vec::new();
        for connection in targets {
            // Record-only: every live publish goes out, even repeats for the
            // same key. Suppression applies to replay, which must not resend
            // what the client already saw here.
            connection.mark_delivered(&event.token);
            if connection.try_deliver(envelope.clone()) {
                counter!("mirador_events_delivered_total").increment(1);
            } else {
                failed.push(connection);
            }
        }

        for connection in failed {
            warn!(
                target = "mirador::stream",
                subscriber_id = %event.subscriber_id,
                connection_id = %connection.id(),
                "Write failed; evicting connection"
            );
            self.unregister(&connection);
        }
    }

    /// Remove a connection from the registry and close its output channel so
    /// the response drain loop terminates. Idempotent: eviction and the
    /// client's own disconnect may race.
    pub fn unregister(&self, connection: &Connection) {
        connection.close();

        let mut connections = rw_write(&self.connections, SOURCE, "unregister");
        let Some(peers) = connections.get_mut(connection.subscriber_id()) else {
            debug!(
                target = "mirador::stream",
                connection_id = %connection.id(),
                "Unregister of already-removed connection"
            );
            return;
        };

        let before = peers.len();
        peers.retain(|peer| peer.id() != connection.id());
        let removed = before - peers.len();
        if peers.is_empty() {
            connections.remove(connection.subscriber_id());
        }
        drop(connections);

        if removed > 0 {
            gauge!("mirador_live_connections").decrement(removed as f64);
            info!(
                target = "mirador::stream",
                subscriber_id = connection.subscriber_id(),
                connection_id = %connection.id(),
                "Connection unregistered"
            );
        }
    }

    /// Write a heartbeat envelope to every live connection, evicting the
    /// ones whose write fails. This is the primary dead-connection detector
    /// and keeps intermediary proxies from idling out the stream.
    pub fn heartbeat(&self) {
        let envelope = Envelope::Heartbeat {
            timestamp: unix_millis(OffsetDateTime::now_utc()),
        };

        let mut failed = Vec::new();
        for connection in self.all_connections() {
            if !connection.try_deliver(envelope.clone()) {
                failed.push(connection);
            }
        }
        for connection in failed {
            warn!(
                target = "mirador::stream",
                connection_id = %connection.id(),
                "Heartbeat write failed; evicting connection"
            );
            self.unregister(&connection);
        }
    }

    pub fn subscriber_connections(&self, subscriber_id: &str) -> Vec<Arc<Connection>> {
        rw_read(&self.connections, SOURCE, "subscriber_connections")
            .get(subscriber_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        rw_read(&self.connections, SOURCE, "all_connections")
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Live connection count per subscriber, for the stats snapshot.
    pub fn connection_counts(&self) -> BTreeMap<String, usize> {
        rw_read(&self.connections, SOURCE, "connection_counts")
            .iter()
            .map(|(subscriber, peers)| (subscriber.clone(), peers.len()))
            .collect()
    }
}
