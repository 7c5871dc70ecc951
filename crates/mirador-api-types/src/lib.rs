//! Shared wire types for the Mirador dashboard backend.
//!
//! Everything a dashboard client (or an integration test) needs to speak the
//! Mirador protocol lives here: the newline-delimited JSON envelopes emitted
//! on `/events/{subscriber_id}`, the storage change notification accepted on
//! `/hooks/storage`, and the snapshot returned by
//! `/api/system/cache-stats`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Convert a timestamp to the unix-millisecond representation used on the
/// wire.
pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// A single newline-terminated JSON envelope on the event stream.
///
/// The `type` tag discriminates the variants; every envelope carries a
/// `timestamp` in unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Initial acknowledgement written when a connection is registered.
    Connection {
        timestamp: i64,
        connection_id: Uuid,
        subscriber_id: String,
    },
    /// Acknowledgement that a `since` watermark was supplied and replay will
    /// precede live delivery.
    Reconnection {
        timestamp: i64,
        connection_id: Uuid,
        since: i64,
    },
    /// Periodic keepalive; doubles as the client's liveness signal.
    Heartbeat { timestamp: i64 },
    /// A cache key was invalidated by an external write.
    Update {
        timestamp: i64,
        subscriber_id: String,
        cache_key: String,
        payload: serde_json::Value,
    },
    /// Header preceding a replay batch.
    MissedEventsSummary {
        timestamp: i64,
        count: usize,
        window_start: i64,
        window_end: i64,
    },
    /// One replayed historical event.
    MissedEvent {
        timestamp: i64,
        key: String,
        payload: serde_json::Value,
    },
    /// Terminator following a replay batch.
    MissedEventsEnd { timestamp: i64, delivered: usize },
}

impl Envelope {
    /// The wire value of the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Connection { .. } => "connection",
            Envelope::Reconnection { .. } => "reconnection",
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::Update { .. } => "update",
            Envelope::MissedEventsSummary { .. } => "missed_events_summary",
            Envelope::MissedEvent { .. } => "missed_event",
            Envelope::MissedEventsEnd { .. } => "missed_events_end",
        }
    }

    /// The envelope timestamp in unix milliseconds.
    pub fn timestamp(&self) -> i64 {
        match self {
            Envelope::Connection { timestamp, .. }
            | Envelope::Reconnection { timestamp, .. }
            | Envelope::Heartbeat { timestamp }
            | Envelope::Update { timestamp, .. }
            | Envelope::MissedEventsSummary { timestamp, .. }
            | Envelope::MissedEvent { timestamp, .. }
            | Envelope::MissedEventsEnd { timestamp, .. } => *timestamp,
        }
    }
}

/// Change notification delivered by the object store's webhook.
///
/// `event` is the store's own event label (`created`/`deleted` and vendor
/// variants thereof); Mirador treats any label identically and keys its
/// behavior on the shape of `key` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageNotification {
    pub event: String,
    pub key: String,
}

/// Aggregated cache observability snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Total number of live cache entries.
    pub total_entries: usize,
    /// Per-module entry counts and entry-age statistics.
    pub modules: BTreeMap<String, ModuleStats>,
    /// Per-key hit/miss counters and ratios.
    pub keys: BTreeMap<String, KeyStats>,
    /// Live connection count per subscriber.
    pub connections: BTreeMap<String, usize>,
}

/// Entry count and age statistics for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleStats {
    pub entries: usize,
    pub age_ms_min: i64,
    pub age_ms_max: i64,
    pub age_ms_mean: i64,
}

/// Hit/miss counters for one cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits divided by total lookups; `0.0` when no lookups were recorded.
    pub hit_ratio: f64,
}
