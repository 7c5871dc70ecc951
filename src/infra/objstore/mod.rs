//! Object store collaborator.
//!
//! The external store where scraping/AI pipelines deposit per-account JSON
//! artifacts. Mirador only ever needs four operations — get, list by
//! prefix, put, delete — so the whole integration surface is one trait with
//! a filesystem-rooted production backend and an in-memory backend for
//! tests.

mod fs;
mod memory;

use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Errors surfaced by an object store backend.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("invalid object key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("object store backend error: {message}")]
    Backend { message: String },
}

impl ObjectStoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// One stored blob together with its write time.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub data: Bytes,
    pub last_modified: OffsetDateTime,
}

/// Key/value blob store addressed by hierarchical `/`-separated keys.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object by its full key.
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError>;

    /// List the keys of every object under a key prefix, in lexicographic
    /// order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    /// Store an object, overwriting any existing blob at the key.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;

    /// Delete an object. Missing objects are treated as success.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    /// Cheap readiness probe for the health endpoint.
    async fn health(&self) -> Result<(), ObjectStoreError>;
}
