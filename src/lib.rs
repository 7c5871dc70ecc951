//! Mirador: a read-through caching backend for analytics dashboards.
//!
//! Dashboard reads go through a TTL-governed in-process cache in front of an
//! object store. External writes to the store arrive as webhook
//! notifications, which invalidate the affected cache prefix and push a
//! change event to the subscriber's live connections. Clients that
//! reconnect with a `since` watermark get the events they missed replayed
//! before live delivery resumes.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod stream;
