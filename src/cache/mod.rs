//! Mirador cache subsystem.
//!
//! A read-through cache over the external object store:
//!
//! - **keys**: typed parsing of `module/platform/subscriber/filename` keys
//! - **policy**: per-module TTL/enabled table with a standard fallback
//! - **store**: the prefix → `(value, inserted_at)` map with hit/miss
//!   counters and a periodic expiry sweep
//! - **metrics**: aggregation into the `/api/system/cache-stats` snapshot

pub mod keys;
mod lock;
pub mod metrics;
mod policy;
mod store;

pub(crate) use lock::{mutex_lock, rw_read, rw_write};
pub use policy::{DEFAULT_TTL, ModulePolicy, PolicyTable};
pub use store::{CacheEntry, CacheStore};
