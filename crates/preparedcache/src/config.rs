//! Cache configuration

use serde::{Deserialize, Serialize};

/// Default number of prepared statements kept per cache
pub const DEFAULT_MAX_PREPARED_STATEMENTS: usize = 1000;

/// Default number of absent-key removals tolerated per key.
///
/// The sixth removal of an absent key is rejected. This is one lower than
/// the gocql driver, whose `hitCache[key] > 5` check tolerates six.
pub const DEFAULT_MISS_TOLERANCE: u32 = 5;

/// Default number of keys whose miss counters are remembered
pub const DEFAULT_LEDGER_CAPACITY: usize = 4096;

/// Configuration for a [`PreparedCache`](crate::PreparedCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached preparations.
    pub max_entries: usize,

    /// How many times a key may be removed while absent before
    /// `remove` starts reporting failure.
    pub miss_tolerance: u32,

    /// Upper bound on remembered miss counters. Values below one are
    /// raised to one.
    pub ledger_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_PREPARED_STATEMENTS,
            miss_tolerance: DEFAULT_MISS_TOLERANCE,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached preparations.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the per-key miss tolerance.
    pub fn with_miss_tolerance(mut self, miss_tolerance: u32) -> Self {
        self.miss_tolerance = miss_tolerance;
        self
    }

    /// Set the miss ledger bound.
    pub fn with_ledger_capacity(mut self, ledger_capacity: usize) -> Self {
        self.ledger_capacity = ledger_capacity;
        self
    }
}
