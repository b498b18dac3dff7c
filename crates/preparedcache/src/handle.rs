//! Store access handed to `get_or_create` callbacks

use crate::key::StatementKey;
use crate::lru::LruStore;
use crate::stats::CacheStats;

/// Narrow view of the cache's store, valid only while the cache lock is held.
///
/// The callback passed to [`PreparedCache::get_or_create`](crate::PreparedCache::get_or_create)
/// receives one of these. It can look entries up and insert new ones, nothing
/// else. It runs with the cache locked: it must be quick, must not block,
/// and must not call back into the same cache.
pub struct StoreHandle<'a, V> {
    store: &'a mut LruStore<StatementKey, V>,
    stats: &'a CacheStats,
}

impl<'a, V> StoreHandle<'a, V> {
    pub(crate) fn new(store: &'a mut LruStore<StatementKey, V>, stats: &'a CacheStats) -> Self {
        Self { store, stats }
    }

    /// Look up an entry, refreshing its recency
    pub fn get(&mut self, key: &StatementKey) -> Option<&V> {
        self.store.get(key)
    }

    /// Check for an entry without refreshing its recency
    pub fn contains(&self, key: &StatementKey) -> bool {
        self.store.contains(key)
    }

    /// Insert or overwrite an entry, evicting the oldest one if the store is full
    pub fn insert(&mut self, key: StatementKey, value: V) {
        self.stats.record_insert();
        if self.store.put(key, value).is_some() {
            self.stats.record_evictions(1);
        }
    }

    /// Number of entries currently stored
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
