//! Live push delivery: connections, broadcast fanout, and health
//! monitoring.
//!
//! Wire envelope types live in the `mirador-api-types` member crate and are
//! re-exported here for convenience.

mod connection;
mod hub;
mod monitor;

pub use connection::Connection;
pub use hub::{BroadcastHub, ChangeEvent, DEFAULT_CHANNEL_CAPACITY};
pub use mirador_api_types::{Envelope, unix_millis};
pub use monitor::{ConnectionHealthMonitor, DEFAULT_STALE_TIMEOUT};
