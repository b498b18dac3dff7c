//! PreparedCache: lock-serialized LRU of prepared statement results

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::handle::StoreHandle;
use crate::key::{derive_key, StatementKey};
use crate::ledger::{Miss, MissLedger};
use crate::lru::LruStore;
use crate::stats::CacheStats;

/// State guarded by the cache lock
struct Inner<V> {
    store: LruStore<StatementKey, V>,
    ledger: MissLedger,
}

/// Bounded cache of prepared statements keyed by (address, keyspace, statement)
///
/// Every operation takes one mutex for its whole duration, so operations on a
/// single cache are linearizable. Values are opaque to the cache; they are
/// normally [`InflightPrepare`](crate::InflightPrepare) handles that may still
/// be in progress.
pub struct PreparedCache<V> {
    /// LRU store and miss ledger
    inner: Mutex<Inner<V>>,

    /// Cache statistics
    stats: CacheStats,
}

impl<V> PreparedCache<V> {
    /// Create a cache with the default configuration
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache holding at most `max_entries` preparations
    pub fn with_capacity(max_entries: usize) -> Self {
        Self::with_config(CacheConfig::default().with_max_entries(max_entries))
    }

    /// Create a cache from an explicit configuration
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: LruStore::new(config.max_entries),
                ledger: MissLedger::new(config.miss_tolerance, config.ledger_capacity),
            }),
            stats: CacheStats::new(),
        }
    }

    /// Derive the key under which a statement is cached
    pub fn key_for(&self, address: &str, keyspace: &str, statement: &str) -> StatementKey {
        derive_key(address, keyspace, statement)
    }

    /// Insert or overwrite the entry for `key`
    ///
    /// Evicts the least recently used entry if the cache is full.
    pub fn add(&self, key: StatementKey, value: V) {
        let mut inner = self.inner.lock();
        self.stats.record_insert();
        if let Some((evicted, _)) = inner.store.put(key, value) {
            self.stats.record_evictions(1);
            trace!(key = %evicted, "evicted prepared statement");
        }
    }

    /// Get the entry for `key`, or run `create` if there is none.
    ///
    /// Returns the value and whether it was found. Lookup and creation happen
    /// under a single lock acquisition: when `create` inserts a value under
    /// `key` through the handle, concurrent callers for the same key see that
    /// value and exactly one of them gets `false`.
    ///
    /// `create` runs with the cache locked. It must not block and must not
    /// touch this cache other than through the handle it is given.
    pub fn get_or_create<F>(&self, key: &StatementKey, create: F) -> (V, bool)
    where
        V: Clone,
        F: FnOnce(&mut StoreHandle<'_, V>) -> V,
    {
        let mut inner = self.inner.lock();

        if let Some(value) = inner.store.get(key) {
            self.stats.record_hit();
            trace!(key = %key, "prepared statement cache hit");
            return (value.clone(), true);
        }

        self.stats.record_miss();
        trace!(key = %key, "prepared statement cache miss");
        let mut handle = StoreHandle::new(&mut inner.store, &self.stats);
        (create(&mut handle), false)
    }

    /// Remove the entry for `key`.
    ///
    /// Returns `true` if the entry was removed, or if it was already gone and
    /// the key is still within its miss tolerance. Returns `false` once a key
    /// has been removed while absent more often than tolerated; what to do
    /// about that is up to the caller.
    pub fn remove(&self, key: &StatementKey) -> bool {
        self.try_remove(key).is_ok()
    }

    /// Like [`remove`](Self::remove), but reports rejection as an error
    pub fn try_remove(&self, key: &StatementKey) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.store.remove(key).is_some() {
            inner.ledger.reset(key);
            return Ok(());
        }

        match inner.ledger.record_miss(key) {
            Miss::Tolerated(attempts) => {
                self.stats.record_tolerated_miss();
                trace!(key = %key, attempts, "tolerated removal of absent statement");
                Ok(())
            }
            Miss::Rejected(attempts) => {
                self.stats.record_rejected_removal();
                warn!(key = %key, attempts, "repeated removal of absent prepared statement");
                Err(Error::RemovalRejected {
                    key: key.to_string(),
                    attempts,
                })
            }
        }
    }

    /// Remove the entry for `key` only if `matches` accepts the stored value.
    ///
    /// Used for internal cleanup: an absent key or a mismatch is a no-op
    /// and never counts against the miss tolerance.
    pub(crate) fn remove_if<P>(&self, key: &StatementKey, matches: P) -> bool
    where
        P: FnOnce(&V) -> bool,
    {
        let mut inner = self.inner.lock();
        let matched = inner.store.peek(key).is_some_and(matches);
        if matched {
            inner.store.remove(key);
        }
        matched
    }

    /// Set the maximum number of entries, evicting the oldest ones that no
    /// longer fit.
    ///
    /// Concurrent calls to `max` should be serialized by the caller; the
    /// last one to run wins.
    pub fn max(&self, max_entries: usize) {
        let mut inner = self.inner.lock();
        let evicted = inner.store.set_capacity(max_entries);
        self.stats.record_evictions(evicted);
        if evicted > 0 {
            debug!(max_entries, evicted, "shrunk prepared statement cache");
        }
    }

    /// Evict every entry. Miss counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let evicted = inner.store.clear();
        self.stats.record_evictions(evicted);
        debug!(evicted, "cleared prepared statement cache");
    }

    /// Check whether `key` is cached without refreshing its recency
    pub fn contains(&self, key: &StatementKey) -> bool {
        self.inner.lock().store.contains(key)
    }

    /// Number of tolerated absent removals currently recorded for `key`
    pub fn miss_count(&self, key: &StatementKey) -> u32 {
        self.inner.lock().ledger.count(key)
    }

    /// Get current number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().store.is_empty()
    }

    /// Get the maximum number of entries
    pub fn max_entries(&self) -> usize {
        self.inner.lock().store.capacity()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<V> Default for PreparedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
