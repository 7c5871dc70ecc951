//! Staleness eviction for half-open connections.
//!
//! Long-lived streams can go half-open without the transport ever reporting
//! closure. The monitor runs independently of the heartbeat writer and
//! forcibly closes and unregisters any connection whose last successful
//! write is older than the reconnect timeout, bounding both registry size
//! and wasted broadcast effort.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::warn;

use super::hub::BroadcastHub;

/// Default age after which a quiet connection is treated as dead.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ConnectionHealthMonitor {
    hub: Arc<BroadcastHub>,
    timeout: Duration,
}

impl ConnectionHealthMonitor {
    pub fn new(hub: Arc<BroadcastHub>, timeout: Duration) -> Self {
        Self { hub, timeout }
    }

    /// Evict every connection stale at `now`. Returns the eviction count.
    pub fn sweep_at(&self, now: OffsetDateTime) -> usize {
        let mut evicted = 0;
        for connection in self.hub.all_connections() {
            if connection.is_stale(now, self.timeout) {
                warn!(
                    target = "mirador::stream",
                    connection_id = %connection.id(),
                    subscriber_id = connection.subscriber_id(),
                    last_activity = %connection.last_activity(),
                    "Stale connection evicted"
                );
                self.hub.unregister(&connection);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(OffsetDateTime::now_utc())
    }
}
