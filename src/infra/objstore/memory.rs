//! In-memory object store backend for tests and demos.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;
use time::OffsetDateTime;

use crate::cache::{rw_read, rw_write};

use super::{ObjectStore, ObjectStoreError, StoredObject};

const SOURCE: &str = "objstore::memory";

#[derive(Clone)]
struct Stored {
    data: Bytes,
    last_modified: OffsetDateTime,
}

/// Map-backed store with the same contract as the filesystem backend.
///
/// `fail_reads` flips every `get`/`list` into a backend error so tests can
/// exercise the degraded read path.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Stored>>,
    fail_reads: RwLock<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with an explicit write time.
    pub fn put_at(&self, key: &str, data: Bytes, last_modified: OffsetDateTime) {
        rw_write(&self.objects, SOURCE, "put_at").insert(
            key.to_string(),
            Stored {
                data,
                last_modified,
            },
        );
    }

    /// Toggle simulated read failures.
    pub fn set_fail_reads(&self, fail: bool) {
        *rw_write(&self.fail_reads, SOURCE, "set_fail_reads") = fail;
    }

    fn check_reads(&self) -> Result<(), ObjectStoreError> {
        if *rw_read(&self.fail_reads, SOURCE, "check_reads") {
            Err(ObjectStoreError::backend("simulated outage"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        self.check_reads()?;
        let objects = rw_read(&self.objects, SOURCE, "get");
        let stored = objects
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::not_found(key))?;
        Ok(StoredObject {
            key: key.to_string(),
            data: stored.data,
            last_modified: stored.last_modified,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        self.check_reads()?;
        let objects = rw_read(&self.objects, SOURCE, "list");
        Ok(objects
            .keys()
            .filter(|key| {
                prefix.is_empty()
                    || key.as_str() == prefix
                    || key.starts_with(&format!("{prefix}/"))
            })
            .cloned()
            .collect())
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        self.put_at(key, data, OffsetDateTime::now_utc());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        rw_write(&self.objects, SOURCE, "delete").remove(key);
        Ok(())
    }

    async fn health(&self) -> Result<(), ObjectStoreError> {
        self.check_reads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_matches_whole_segments_only() {
        let store = MemoryObjectStore::new();
        store.put("events/ig/jane/1.json", Bytes::new()).await.unwrap();
        store.put("events/ig/janet/1.json", Bytes::new()).await.unwrap();

        let keys = store.list("events/ig/jane").await.expect("list");
        assert_eq!(keys, vec!["events/ig/jane/1.json"]);
    }

    #[tokio::test]
    async fn simulated_outage_fails_reads_but_not_writes() {
        let store = MemoryObjectStore::new();
        store.set_fail_reads(true);

        assert!(store.get("a/b/c/d").await.is_err());
        assert!(store.list("a").await.is_err());
        assert!(store.put("a/b/c/d", Bytes::new()).await.is_ok());

        store.set_fail_reads(false);
        assert!(store.get("a/b/c/d").await.is_ok());
    }
}
