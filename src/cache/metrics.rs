//! Aggregation of cache observability data into the stats snapshot.

use std::collections::BTreeMap;

use mirador_api_types::{CacheStatsSnapshot, ModuleStats};
use time::OffsetDateTime;

use super::store::CacheStore;

/// Build the read-only statistics snapshot served on
/// `/api/system/cache-stats`.
///
/// `connections` is the live connection count per subscriber as reported by
/// the broadcast hub.
pub fn collect(
    store: &CacheStore,
    connections: BTreeMap<String, usize>,
    now: OffsetDateTime,
) -> CacheStatsSnapshot {
    let ages = store.entry_ages(now);

    let mut modules: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for (prefix, age_ms) in &ages {
        modules
            .entry(prefix.module().to_string())
            .or_default()
            .push(*age_ms);
    }

    let modules = modules
        .into_iter()
        .map(|(module, ages)| {
            let entries = ages.len();
            let min = ages.iter().copied().min().unwrap_or(0);
            let max = ages.iter().copied().max().unwrap_or(0);
            let mean = if entries == 0 {
                0
            } else {
                ages.iter().sum::<i64>() / entries as i64
            };
            (
                module,
                ModuleStats {
                    entries,
                    age_ms_min: min,
                    age_ms_max: max,
                    age_ms_mean: mean,
                },
            )
        })
        .collect();

    CacheStatsSnapshot {
        total_entries: ages.len(),
        modules,
        keys: store.counter_snapshot(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::keys::CachePrefix;
    use crate::cache::policy::PolicyTable;

    #[test]
    fn aggregates_per_module_age_stats() {
        let store = CacheStore::new(PolicyTable::new(HashMap::new()));
        let now = OffsetDateTime::now_utc();

        store.set_at(
            CachePrefix::new("recommendations", "instagram", "a"),
            vec![json!(1)],
            now - Duration::from_millis(100),
        );
        store.set_at(
            CachePrefix::new("recommendations", "instagram", "b"),
            vec![json!(2)],
            now - Duration::from_millis(300),
        );
        store.set_at(
            CachePrefix::new("rules", "tiktok", "a"),
            vec![json!(3)],
            now - Duration::from_millis(50),
        );

        let snapshot = collect(&store, BTreeMap::new(), now);
        assert_eq!(snapshot.total_entries, 3);

        let recs = &snapshot.modules["recommendations"];
        assert_eq!(recs.entries, 2);
        assert_eq!(recs.age_ms_min, 100);
        assert_eq!(recs.age_ms_max, 300);
        assert_eq!(recs.age_ms_mean, 200);

        assert_eq!(snapshot.modules["rules"].entries, 1);
    }

    #[test]
    fn includes_connection_counts_and_key_counters() {
        let store = CacheStore::new(PolicyTable::new(HashMap::new()));
        let prefix = CachePrefix::new("recommendations", "instagram", "jane");
        store.should_serve_from_cache(&prefix); // records one miss

        let mut connections = BTreeMap::new();
        connections.insert("jane".to_string(), 2);

        let snapshot = collect(&store, connections, OffsetDateTime::now_utc());
        assert_eq!(snapshot.connections["jane"], 2);
        assert_eq!(snapshot.keys[&prefix.to_string()].misses, 1);
        assert_eq!(snapshot.total_entries, 0);
    }

    #[test]
    fn empty_store_produces_empty_snapshot() {
        let store = CacheStore::new(PolicyTable::new(HashMap::new()));
        let snapshot = collect(&store, BTreeMap::new(), OffsetDateTime::now_utc());
        assert_eq!(snapshot, CacheStatsSnapshot::default());
    }
}
