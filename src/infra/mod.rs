//! Infrastructure: object storage, HTTP transport, telemetry.

pub mod error;
pub mod http;
pub mod objstore;
pub mod telemetry;
