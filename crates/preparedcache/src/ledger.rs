//! Miss-tolerance ledger
//!
//! Invalidation requests for a stale statement often arrive from several
//! callers at once; only the first finds the entry. The ledger counts the
//! absent-key removals per key so that a few of them are absorbed while an
//! endless stream of them is reported.

use crate::key::StatementKey;
use crate::lru::LruStore;

/// Outcome of recording a removal attempt on an absent key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// Absorbed; carries the updated count
    Tolerated(u32),
    /// Over the limit; carries the count that was reached
    Rejected(u32),
}

/// Per-key counters of tolerated absent-key removals
///
/// A key with no counter is equivalent to a count of zero. Counters are
/// kept in their own LRU, so the ledger cannot outgrow `capacity`. The
/// capacity is at least one; an empty ledger would tolerate misses forever.
pub(crate) struct MissLedger {
    counts: LruStore<StatementKey, u32>,
    tolerance: u32,
}

impl MissLedger {
    pub(crate) fn new(tolerance: u32, capacity: usize) -> Self {
        Self {
            counts: LruStore::new(capacity.max(1)),
            tolerance,
        }
    }

    /// Record a removal of `key` that found nothing.
    pub(crate) fn record_miss(&mut self, key: &StatementKey) -> Miss {
        let count = self.counts.get(key).copied().unwrap_or(0);
        if count >= self.tolerance {
            return Miss::Rejected(count);
        }

        let count = count + 1;
        self.counts.put(key.clone(), count);
        Miss::Tolerated(count)
    }

    /// Reset the counter after a removal that found the key.
    pub(crate) fn reset(&mut self, key: &StatementKey) {
        self.counts.remove(key);
    }

    pub(crate) fn count(&self, key: &StatementKey) -> u32 {
        self.counts.peek(key).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    #[test]
    fn test_tolerates_up_to_limit() {
        let mut ledger = MissLedger::new(5, 16);
        let key = derive_key("h1", "ks", "SELECT 1");

        for i in 1..=5 {
            assert_eq!(ledger.record_miss(&key), Miss::Tolerated(i));
        }
        assert_eq!(ledger.record_miss(&key), Miss::Rejected(5));
        assert_eq!(ledger.record_miss(&key), Miss::Rejected(5));
        assert_eq!(ledger.count(&key), 5);
    }

    #[test]
    fn test_reset() {
        let mut ledger = MissLedger::new(2, 16);
        let key = derive_key("h1", "ks", "SELECT 1");

        ledger.record_miss(&key);
        ledger.record_miss(&key);
        assert_eq!(ledger.record_miss(&key), Miss::Rejected(2));

        ledger.reset(&key);
        assert_eq!(ledger.count(&key), 0);
        assert_eq!(ledger.record_miss(&key), Miss::Tolerated(1));
    }

    #[test]
    fn test_zero_tolerance_rejects_immediately() {
        let mut ledger = MissLedger::new(0, 16);
        let key = derive_key("h1", "ks", "SELECT 1");

        assert_eq!(ledger.record_miss(&key), Miss::Rejected(0));
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn test_counters_are_independent() {
        let mut ledger = MissLedger::new(1, 16);
        let a = derive_key("h1", "ks", "SELECT 1");
        let b = derive_key("h2", "ks", "SELECT 1");

        assert_eq!(ledger.record_miss(&a), Miss::Tolerated(1));
        assert_eq!(ledger.record_miss(&b), Miss::Tolerated(1));
        assert_eq!(ledger.record_miss(&a), Miss::Rejected(1));
    }

    #[test]
    fn test_zero_capacity_keeps_one_counter() {
        let mut ledger = MissLedger::new(1, 0);
        let key = derive_key("h1", "ks", "SELECT 1");

        assert_eq!(ledger.record_miss(&key), Miss::Tolerated(1));
        assert_eq!(ledger.record_miss(&key), Miss::Rejected(1));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_bounded() {
        let mut ledger = MissLedger::new(5, 3);

        for i in 0..10 {
            ledger.record_miss(&derive_key("h", "ks", &format!("SELECT {i}")));
        }

        assert_eq!(ledger.len(), 3);
        // Oldest counters were forgotten
        assert_eq!(ledger.count(&derive_key("h", "ks", "SELECT 0")), 0);
        assert_eq!(ledger.count(&derive_key("h", "ks", "SELECT 9")), 1);
    }
}
