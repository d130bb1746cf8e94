//! In-memory Identity Cache
//!
//! One `RwLock<HashMap>` per identity kind. Lookups take the read lock
//! only, so concurrent ingestion calls hitting the cache never block each
//! other; writers hold the write lock for a single insert.

use crate::cache::{CacheError, CacheStats, IdentityCache};
use crate::series::{Fingerprint, Label, LabelId, MetricTable, SeriesId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

/// Unbounded, process-local identity cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    labels: RwLock<HashMap<Label, LabelId>>,
    series: RwLock<HashMap<Fingerprint, SeriesId>>,
    metric_tables: RwLock<HashMap<String, MetricTable>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lookup<K, Q, V>(map: &RwLock<HashMap<K, V>>, key: &Q) -> Option<V>
where
    K: Eq + Hash + std::borrow::Borrow<Q>,
    Q: Eq + Hash + ?Sized,
    V: Clone,
{
    // A poisoned map still holds only fully inserted entries
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
}

fn store<K, V>(
    map: &RwLock<HashMap<K, V>>,
    kind: &'static str,
    key: K,
    value: V,
) -> Result<Option<V>, CacheError>
where
    K: Eq + Hash,
{
    let mut guard = map.write().map_err(|_| CacheError::Poisoned(kind))?;
    Ok(guard.insert(key, value))
}

fn len<K, V>(map: &RwLock<HashMap<K, V>>) -> usize {
    map.read().unwrap_or_else(PoisonError::into_inner).len()
}

impl IdentityCache for MemoryCache {
    fn get_label(&self, label: &Label) -> Option<LabelId> {
        lookup(&self.labels, label)
    }

    fn set_label(&self, label: &Label, id: LabelId) -> Result<(), CacheError> {
        if let Some(previous) = store(&self.labels, "labels", label.clone(), id)? {
            if previous != id {
                tracing::warn!(%label, previous, id, "Label ID changed in cache");
            }
        }
        Ok(())
    }

    fn get_series(&self, fingerprint: Fingerprint) -> Option<SeriesId> {
        lookup(&self.series, &fingerprint)
    }

    fn set_series(&self, fingerprint: Fingerprint, id: SeriesId) -> Result<(), CacheError> {
        if let Some(previous) = store(&self.series, "series", fingerprint, id)? {
            if previous != id {
                tracing::warn!(fingerprint, previous, id, "Series ID changed in cache");
            }
        }
        Ok(())
    }

    fn get_metric_table(&self, metric_name: &str) -> Option<MetricTable> {
        lookup(&self.metric_tables, metric_name)
    }

    fn set_metric_table(&self, metric_name: &str, table: MetricTable) -> Result<(), CacheError> {
        store(
            &self.metric_tables,
            "metric_tables",
            metric_name.to_string(),
            table,
        )?;
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            labels: len(&self.labels),
            series: len(&self.series),
            metric_tables: len(&self.metric_tables),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_label_miss_then_hit() {
        let cache = MemoryCache::new();
        let label = Label::new("job", "node");

        assert_eq!(cache.get_label(&label), None);

        cache.set_label(&label, 7).unwrap();
        assert_eq!(cache.get_label(&label), Some(7));

        // Same name, other value is a different label
        assert_eq!(cache.get_label(&Label::new("job", "api")), None);
    }

    #[test]
    fn test_series_miss_then_hit() {
        let cache = MemoryCache::new();

        assert_eq!(cache.get_series(42), None);
        cache.set_series(42, 3).unwrap();
        assert_eq!(cache.get_series(42), Some(3));
    }

    #[test]
    fn test_metric_table_roundtrip() {
        let cache = MemoryCache::new();
        let table = MetricTable {
            id: 1,
            table_name: "up".to_string(),
        };

        assert!(cache.get_metric_table("up").is_none());
        cache.set_metric_table("up", table.clone()).unwrap();
        assert_eq!(cache.get_metric_table("up"), Some(table));
    }

    #[test]
    fn test_stats() {
        let cache = MemoryCache::new();
        cache.set_label(&Label::new("a", "1"), 1).unwrap();
        cache.set_label(&Label::new("a", "2"), 2).unwrap();
        cache.set_series(10, 1).unwrap();

        assert_eq!(
            cache.stats(),
            CacheStats {
                labels: 2,
                series: 1,
                metric_tables: 0,
            }
        );
    }

    #[test]
    fn test_concurrent_same_key_writes() {
        let cache = Arc::new(MemoryCache::new());
        let label = Label::new("job", "node");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let label = label.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if cache.get_label(&label).is_none() {
                            cache.set_label(&label, 11).unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.get_label(&label), Some(11));
        assert_eq!(cache.stats().labels, 1);
    }

    #[test]
    fn test_poisoned_write_is_reported() {
        let cache = Arc::new(MemoryCache::new());

        let poisoner = Arc::clone(&cache);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.series.write().unwrap();
            panic!("poison the series map");
        })
        .join();

        let err = cache.set_series(1, 1).unwrap_err();
        assert!(matches!(err, CacheError::Poisoned("series")));

        // Reads still work
        assert_eq!(cache.get_series(1), None);
    }
}
