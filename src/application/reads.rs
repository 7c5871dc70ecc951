//! Read-through dashboard reads.
//!
//! The dashboard request path: policy lookup and TTL check against the
//! cache, then a single-flight object-store fetch on miss. Store outages
//! degrade to the last cached value (even when expired) or an empty result;
//! they never surface as hard failures to the dashboard.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::cache::keys::CachePrefix;
use crate::infra::objstore::{ObjectStore, ObjectStoreError};

pub struct DashboardReadService {
    store: Arc<CacheStore>,
    objects: Arc<dyn ObjectStore>,
    /// In-flight fetches keyed by prefix. Concurrent misses on one key
    /// coalesce onto the first fetch instead of dogpiling the store.
    flights: Mutex<HashMap<CachePrefix, Arc<OnceCell<Vec<Value>>>>>,
}

impl DashboardReadService {
    pub fn new(store: Arc<CacheStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            objects,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Serve the artifact list for a prefix, from cache when policy allows.
    pub async fn fetch(&self, prefix: &CachePrefix) -> Vec<Value> {
        self.fetch_at(prefix, OffsetDateTime::now_utc()).await
    }

    /// Read with an explicit `now` for the TTL check, for deterministic
    /// tests.
    pub async fn fetch_at(&self, prefix: &CachePrefix, now: OffsetDateTime) -> Vec<Value> {
        if self.store.should_serve_at(prefix, now) {
            if let Some(value) = self.store.get(prefix) {
                return value;
            }
        }
        self.populate(prefix).await
    }

    /// Populate via a shared in-flight fetch, then fall back to whatever is
    /// cached (fresh or not) when the store is unreachable.
    async fn populate(&self, prefix: &CachePrefix) -> Vec<Value> {
        let cell = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(prefix.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_try_init(|| self.load(prefix))
            .await
            .cloned();

        {
            let mut flights = self.flights.lock().await;
            if let Some(current) = flights.get(prefix) {
                if Arc::ptr_eq(current, &cell) {
                    flights.remove(prefix);
                }
            }
        }

        match result {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target = "mirador::reads",
                    cache_key = %prefix,
                    error = %err,
                    "Store fetch failed; serving degraded read"
                );
                self.store.get(prefix).unwrap_or_default()
            }
        }
    }

    /// List and fetch every artifact under the prefix. Individual unreadable
    /// or unparsable objects are skipped; a failed listing aborts the load.
    async fn load(&self, prefix: &CachePrefix) -> Result<Vec<Value>, ObjectStoreError> {
        let keys = self.objects.list(&prefix.to_string()).await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let object = match self.objects.get(&key).await {
                Ok(object) => object,
                Err(err) => {
                    debug!(
                        target = "mirador::reads",
                        key, error = %err,
                        "Skipping unreadable artifact"
                    );
                    continue;
                }
            };
            match serde_json::from_slice::<Value>(&object.data) {
                Ok(value) => records.push(value),
                Err(err) => {
                    debug!(
                        target = "mirador::reads",
                        key, error = %err,
                        "Skipping unparsable artifact"
                    );
                }
            }
        }

        self.store.set(prefix.clone(), records.clone());
        Ok(records)
    }
}
