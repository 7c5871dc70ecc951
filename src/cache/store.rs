//! In-memory read-through cache storage.
//!
//! Maps `module/platform/subscriber` prefixes to the artifact lists fetched
//! from the object store, together with their population time. The store
//! never errors: a miss simply tells the caller to go populate.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;
use mirador_api_types::KeyStats;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::keys::CachePrefix;
use super::lock::{rw_read, rw_write};
use super::policy::PolicyTable;

const SOURCE: &str = "cache::store";

/// One cached artifact list.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Vec<serde_json::Value>,
    pub inserted_at: OffsetDateTime,
}

#[derive(Default)]
struct KeyCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Process-wide cache of object-store artifact lists.
///
/// Entries are owned exclusively by this store and mutated only through
/// [`CacheStore::set`] and [`CacheStore::invalidate`]. Hit/miss counters are
/// observability only and never influence lookup results.
pub struct CacheStore {
    policies: PolicyTable,
    entries: RwLock<HashMap<CachePrefix, CacheEntry>>,
    counters: DashMap<String, KeyCounters>,
}

impl CacheStore {
    pub fn new(policies: PolicyTable) -> Self {
        Self {
            policies,
            entries: RwLock::new(HashMap::new()),
            counters: DashMap::new(),
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Whether a read for `prefix` may be answered from cache right now.
    ///
    /// Disabled modules are always refetched; otherwise the entry must exist
    /// and be younger than its policy TTL. Counters are bumped as a side
    /// effect.
    pub fn should_serve_from_cache(&self, prefix: &CachePrefix) -> bool {
        self.should_serve_at(prefix, OffsetDateTime::now_utc())
    }

    /// TTL check against an explicit `now`, for deterministic tests.
    pub fn should_serve_at(&self, prefix: &CachePrefix, now: OffsetDateTime) -> bool {
        let policy = self.policies.resolve(prefix);
        if !policy.enabled {
            self.record_miss(prefix);
            return false;
        }

        let fresh = {
            let entries = rw_read(&self.entries, SOURCE, "should_serve_at");
            entries
                .get(prefix)
                .is_some_and(|entry| now - entry.inserted_at < policy.ttl)
        };

        if fresh {
            self.record_hit(prefix);
        } else {
            self.record_miss(prefix);
        }
        fresh
    }

    /// Fetch the cached value regardless of age.
    pub fn get(&self, prefix: &CachePrefix) -> Option<Vec<serde_json::Value>> {
        rw_read(&self.entries, SOURCE, "get")
            .get(prefix)
            .map(|entry| entry.value.clone())
    }

    /// Store a value, overwriting any prior entry for the prefix.
    pub fn set(&self, prefix: CachePrefix, value: Vec<serde_json::Value>) {
        self.set_at(prefix, value, OffsetDateTime::now_utc());
    }

    /// Store a value with an explicit population time, for deterministic
    /// tests.
    pub fn set_at(
        &self,
        prefix: CachePrefix,
        value: Vec<serde_json::Value>,
        inserted_at: OffsetDateTime,
    ) {
        let entry = CacheEntry { value, inserted_at };
        rw_write(&self.entries, SOURCE, "set").insert(prefix, entry);
    }

    /// Remove the entry for a prefix. No-op when absent.
    pub fn invalidate(&self, prefix: &CachePrefix) {
        let removed = rw_write(&self.entries, SOURCE, "invalidate")
            .remove(prefix)
            .is_some();
        if removed {
            counter!("mirador_cache_invalidated_total").increment(1);
            debug!(
                target = "mirador::cache",
                cache_key = %prefix,
                "Cache entry invalidated"
            );
        }
    }

    /// Remove every entry older than its policy TTL. Returns the number of
    /// entries swept.
    ///
    /// Runs on a fixed interval so entries for accounts that are never
    /// requested again still get released.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(OffsetDateTime::now_utc())
    }

    pub fn sweep_expired_at(&self, now: OffsetDateTime) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "sweep_expired");
        let before = entries.len();
        entries.retain(|prefix, entry| {
            let policy = self.policies.resolve(prefix);
            now - entry.inserted_at < policy.ttl
        });
        let swept = before - entries.len();
        drop(entries);

        if swept > 0 {
            counter!("mirador_cache_swept_total").increment(swept as u64);
            info!(
                target = "mirador::cache",
                swept, "Expired cache entries swept"
            );
        }
        swept
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of every live entry in milliseconds, for the stats snapshot.
    pub fn entry_ages(&self, now: OffsetDateTime) -> Vec<(CachePrefix, i64)> {
        rw_read(&self.entries, SOURCE, "entry_ages")
            .iter()
            .map(|(prefix, entry)| {
                let age_ms = (now - entry.inserted_at).whole_milliseconds() as i64;
                (prefix.clone(), age_ms.max(0))
            })
            .collect()
    }

    /// Per-key hit/miss counters with derived ratios.
    pub fn counter_snapshot(&self) -> BTreeMap<String, KeyStats> {
        self.counters
            .iter()
            .map(|entry| {
                let hits = entry.value().hits.load(Ordering::Relaxed);
                let misses = entry.value().misses.load(Ordering::Relaxed);
                let total = hits + misses;
                let hit_ratio = if total == 0 {
                    0.0
                } else {
                    hits as f64 / total as f64
                };
                (
                    entry.key().clone(),
                    KeyStats {
                        hits,
                        misses,
                        hit_ratio,
                    },
                )
            })
            .collect()
    }

    fn record_hit(&self, prefix: &CachePrefix) {
        counter!("mirador_cache_hit_total").increment(1);
        self.counters
            .entry(prefix.to_string())
            .or_default()
            .hits
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, prefix: &CachePrefix) {
        counter!("mirador_cache_miss_total").increment(1);
        self.counters
            .entry(prefix.to_string())
            .or_default()
            .misses
            .fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::policy::ModulePolicy;

    fn store_with_ttl(module: &str, ttl: Duration, enabled: bool) -> CacheStore {
        let mut modules = StdHashMap::new();
        modules.insert(module.to_string(), ModulePolicy { ttl, enabled });
        CacheStore::new(PolicyTable::new(modules))
    }

    fn prefix() -> CachePrefix {
        CachePrefix::new("recommendations", "instagram", "jane")
    }

    #[test]
    fn fresh_entry_is_served_from_cache() {
        let store = store_with_ttl("recommendations", Duration::from_millis(1000), true);
        let now = OffsetDateTime::now_utc();
        store.set_at(prefix(), vec![json!(1), json!(2), json!(3)], now);

        assert!(store.should_serve_at(&prefix(), now + Duration::from_millis(500)));
        assert_eq!(
            store.get(&prefix()),
            Some(vec![json!(1), json!(2), json!(3)])
        );

        let counters = store.counter_snapshot();
        assert_eq!(counters[&prefix().to_string()].hits, 1);
    }

    #[test]
    fn expired_entry_signals_miss_but_stays_readable() {
        let store = store_with_ttl("recommendations", Duration::from_millis(1000), true);
        let now = OffsetDateTime::now_utc();
        store.set_at(prefix(), vec![json!("stale")], now);

        assert!(!store.should_serve_at(&prefix(), now + Duration::from_millis(1500)));
        // `get` ignores TTL so the degraded read path can still use it.
        assert_eq!(store.get(&prefix()), Some(vec![json!("stale")]));
        assert_eq!(store.counter_snapshot()[&prefix().to_string()].misses, 1);
    }

    #[test]
    fn disabled_module_never_serves_from_cache() {
        let store = store_with_ttl("recommendations", Duration::from_secs(3600), false);
        let now = OffsetDateTime::now_utc();
        store.set_at(prefix(), vec![json!("realtime")], now);

        assert!(!store.should_serve_at(&prefix(), now));
        assert!(!store.should_serve_at(&prefix(), now + Duration::from_millis(1)));
    }

    #[test]
    fn invalidate_is_idempotent_and_immediate() {
        let store = store_with_ttl("recommendations", Duration::from_secs(60), true);
        store.set(prefix(), vec![json!("old")]);

        store.invalidate(&prefix());
        assert_eq!(store.get(&prefix()), None);
        assert!(!store.should_serve_from_cache(&prefix()));

        // Second invalidation of an absent key is a no-op.
        store.invalidate(&prefix());
        assert!(store.is_empty());
    }

    #[test]
    fn set_overwrites_prior_entry() {
        let store = store_with_ttl("recommendations", Duration::from_secs(60), true);
        store.set(prefix(), vec![json!("first")]);
        store.set(prefix(), vec![json!("second")]);
        assert_eq!(store.get(&prefix()), Some(vec![json!("second")]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sweep_removes_only_entries_past_their_ttl() {
        let mut modules = StdHashMap::new();
        modules.insert(
            "short".to_string(),
            ModulePolicy {
                ttl: Duration::from_millis(100),
                enabled: true,
            },
        );
        modules.insert(
            "long".to_string(),
            ModulePolicy {
                ttl: Duration::from_secs(3600),
                enabled: true,
            },
        );
        let store = CacheStore::new(PolicyTable::new(modules));

        let now = OffsetDateTime::now_utc();
        let short = CachePrefix::new("short", "instagram", "jane");
        let long = CachePrefix::new("long", "instagram", "jane");
        store.set_at(short.clone(), vec![json!(1)], now);
        store.set_at(long.clone(), vec![json!(2)], now);

        let swept = store.sweep_expired_at(now + Duration::from_secs(1));
        assert_eq!(swept, 1);
        assert_eq!(store.get(&short), None);
        assert_eq!(store.get(&long), Some(vec![json!(2)]));
    }

    #[test]
    fn counters_accumulate_per_key() {
        let store = store_with_ttl("recommendations", Duration::from_secs(60), true);
        let now = OffsetDateTime::now_utc();

        assert!(!store.should_serve_at(&prefix(), now)); // miss: absent
        store.set_at(prefix(), vec![json!(1)], now);
        assert!(store.should_serve_at(&prefix(), now)); // hit
        assert!(store.should_serve_at(&prefix(), now)); // hit

        let stats = &store.counter_snapshot()[&prefix().to_string()];
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn entry_ages_report_nonnegative_ms() {
        let store = store_with_ttl("recommendations", Duration::from_secs(60), true);
        let now = OffsetDateTime::now_utc();
        store.set_at(prefix(), vec![json!(1)], now);

        let ages = store.entry_ages(now + Duration::from_millis(250));
        assert_eq!(ages.len(), 1);
        assert_eq!(ages[0].0, prefix());
        assert!(ages[0].1 >= 250);
    }
}
