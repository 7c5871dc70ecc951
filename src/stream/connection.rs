//! Live connection resource.
//!
//! One `Connection` per open event stream. The broadcast hub and the replay
//! task are the only writers; the HTTP layer drains the receiving half into
//! the response body. A connection is removed from the registry exactly once,
//! on client disconnect, write failure, or staleness eviction.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use mirador_api_types::Envelope;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::mutex_lock;

const SOURCE: &str = "stream::connection";

/// Upper bound on remembered delivery tokens per connection. Old tokens are
/// forgotten first; the window only needs to span one replay batch.
const RECENT_DELIVERY_CAPACITY: usize = 256;

/// Bounded memory of recently delivered event tokens, for duplicate
/// suppression across the replay/live boundary.
struct DeliveredSet {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DeliveredSet {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record a token. Returns `false` when it was already present.
    fn insert(&mut self, token: &str) -> bool {
        if self.seen.contains(token) {
            return false;
        }
        if self.order.len() == RECENT_DELIVERY_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(token.to_string());
        self.seen.insert(token.to_string());
        true
    }
}

/// A single subscriber's live push connection.
pub struct Connection {
    id: Uuid,
    subscriber_id: String,
    /// Taken on close. Without a live sender the receiving half drains to
    /// `None`, which is what terminates the HTTP response stream.
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    last_activity: Mutex<OffsetDateTime>,
    delivered: Mutex<DeliveredSet>,
}

impl Connection {
    pub(crate) fn new(
        subscriber_id: &str,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let connection = Self {
            id: Uuid::new_v4(),
            subscriber_id: subscriber_id.to_string(),
            sender: Mutex::new(Some(sender)),
            last_activity: Mutex::new(OffsetDateTime::now_utc()),
            delivered: Mutex::new(DeliveredSet::new()),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Best-effort, non-blocking write. A full or closed channel counts as a
    /// dead connection; the caller is expected to evict on `false`.
    pub fn try_deliver(&self, envelope: Envelope) -> bool {
        let Some(sender) = self.sender() else {
            return false;
        };
        match sender.try_send(envelope) {
            Ok(()) => {
                self.touch();
                true
            }
            Err(_) => false,
        }
    }

    /// Awaiting write used by the replay task, which paces itself and may
    /// legitimately fill the channel faster than the client drains it.
    pub async fn deliver(&self, envelope: Envelope) -> bool {
        let Some(sender) = self.sender() else {
            return false;
        };
        match sender.send(envelope).await {
            Ok(()) => {
                self.touch();
                true
            }
            Err(_) => false,
        }
    }

    /// Drop the sending half so already-buffered envelopes still drain but
    /// `recv` then returns `None` and the response stream ends. Idempotent;
    /// every write after close fails.
    pub fn close(&self) {
        mutex_lock(&self.sender, SOURCE, "close").take();
    }

    fn sender(&self) -> Option<mpsc::Sender<Envelope>> {
        mutex_lock(&self.sender, SOURCE, "sender").clone()
    }

    /// Record a delivery token. Returns `false` when the token was already
    /// delivered on this connection.
    pub fn mark_delivered(&self, token: &str) -> bool {
        mutex_lock(&self.delivered, SOURCE, "mark_delivered").insert(token)
    }

    pub fn last_activity(&self) -> OffsetDateTime {
        *mutex_lock(&self.last_activity, SOURCE, "last_activity")
    }

    /// Whether the connection has gone quiet past the staleness timeout.
    pub fn is_stale(&self, now: OffsetDateTime, timeout: Duration) -> bool {
        now - self.last_activity() > timeout
    }

    fn touch(&self) {
        *mutex_lock(&self.last_activity, SOURCE, "touch") = OffsetDateTime::now_utc();
    }
}
