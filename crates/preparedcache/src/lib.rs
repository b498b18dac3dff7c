//! # preparedcache
//!
//! Bounded cache of prepared statements for database drivers.
//!
//! ## Architecture
//! - **LRU store**: AHash map over an intrusive list, O(1) touch and eviction
//! - **Miss ledger**: bounded per-key count of removals that found nothing
//! - **Single lock**: one `parking_lot::Mutex` per cache makes every operation atomic
//! - **In-flight slots**: concurrent callers share one preparation per statement
//!
//! ```
//! use preparedcache::{InflightPrepare, PreparedCache};
//!
//! let cache: PreparedCache<InflightPrepare<u64>> = PreparedCache::new();
//! let id = cache.prepare_with("10.0.0.1:9042", "shop", "SELECT * FROM orders WHERE id = ?", || {
//!     Ok::<_, std::io::Error>(42)
//! });
//! assert_eq!(id, Ok(42));
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod error;
mod handle;
mod inflight;
mod key;
mod ledger;
mod lru;
mod stats;

pub use cache::PreparedCache;
pub use config::{
    CacheConfig, DEFAULT_LEDGER_CAPACITY, DEFAULT_MAX_PREPARED_STATEMENTS, DEFAULT_MISS_TOLERANCE,
};
pub use error::{Error, Result};
pub use handle::StoreHandle;
pub use inflight::{Completer, InflightPrepare};
pub use key::{derive_key, StatementKey};
pub use stats::CacheStats;
