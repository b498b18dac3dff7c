//! In-flight preparations
//!
//! The value cached per statement is a shared slot rather than the prepared
//! result itself. The first caller to miss inserts an empty slot while still
//! holding the cache lock, prepares the statement with the lock released,
//! and then fills the slot. Everyone who finds the slot in the meantime
//! waits on it instead of sending their own prepare request.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::cache::PreparedCache;
use crate::error::{Error, Result};
use crate::key::StatementKey;

enum State<T> {
    Pending,
    Done(Result<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// Shared handle to a preparation that may still be running
///
/// Clones refer to the same slot. The slot is completed at most once; every
/// clone then observes the same outcome.
pub struct InflightPrepare<T> {
    shared: Arc<Shared<T>>,
}

impl<T> InflightPrepare<T> {
    /// Create an empty, pending slot
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// Create a slot that is already completed
    pub fn ready(outcome: Result<T>) -> Self {
        let flight = Self::new();
        flight.complete(outcome);
        flight
    }

    /// Fill the slot and wake every waiter.
    ///
    /// Returns `false` if the slot had already been completed, in which case
    /// `outcome` is dropped.
    pub fn complete(&self, outcome: Result<T>) -> bool {
        let mut state = self.shared.state.lock();
        if matches!(*state, State::Done(_)) {
            return false;
        }
        *state = State::Done(outcome);
        drop(state);
        self.shared.ready.notify_all();
        true
    }

    /// Guard that completes the slot, or abandons it when dropped unused
    pub fn completer(&self) -> Completer<T> {
        Completer {
            flight: Some(self.clone()),
        }
    }

    /// Whether the slot has been completed
    pub fn is_complete(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(_))
    }

    /// Whether two handles refer to the same slot
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone> InflightPrepare<T> {
    /// The outcome, if the slot has been completed
    pub fn try_get(&self) -> Option<Result<T>> {
        match &*self.shared.state.lock() {
            State::Pending => None,
            State::Done(outcome) => Some(outcome.clone()),
        }
    }

    /// Block until the slot is completed
    pub fn wait(&self) -> Result<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return outcome.clone();
            }
            self.shared.ready.wait(&mut state);
        }
    }

    /// Block until the slot is completed or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return outcome.clone();
            }
            if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
                return match &*state {
                    State::Done(outcome) => outcome.clone(),
                    State::Pending => Err(Error::Timeout(timeout)),
                };
            }
        }
    }
}

impl<T> Clone for InflightPrepare<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for InflightPrepare<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InflightPrepare<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock() {
            State::Pending => "pending",
            State::Done(Ok(_)) => "prepared",
            State::Done(Err(_)) => "failed",
        };
        f.debug_struct("InflightPrepare").field("state", &state).finish()
    }
}

/// Producer side of an [`InflightPrepare`]
///
/// Dropping it without calling [`complete`](Completer::complete) completes
/// the slot with [`Error::Abandoned`], so waiters never hang on a producer
/// that bailed out or panicked.
pub struct Completer<T> {
    flight: Option<InflightPrepare<T>>,
}

impl<T> Completer<T> {
    /// Fill the slot. Returns `false` if it was already completed.
    pub fn complete(mut self, outcome: Result<T>) -> bool {
        match self.flight.take() {
            Some(flight) => flight.complete(outcome),
            None => false,
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            flight.complete(Err(Error::Abandoned));
        }
    }
}

/// Removes this caller's slot from the cache unless disarmed.
///
/// The slot may have been evicted, or replaced by another caller's, while
/// the preparation ran unlocked; only the exact slot is removed.
struct EvictOnDrop<'a, T> {
    cache: &'a PreparedCache<InflightPrepare<T>>,
    key: &'a StatementKey,
    flight: InflightPrepare<T>,
    armed: bool,
}

impl<T> Drop for EvictOnDrop<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.cache
                .remove_if(self.key, |stored| stored.same_slot(&self.flight));
        }
    }
}

impl<T: Clone> PreparedCache<InflightPrepare<T>> {
    /// Prepare `statement` on `address` in `keyspace`, at most once at a time.
    ///
    /// The first caller for a key runs `prepare` with the cache unlocked and
    /// publishes its outcome; concurrent and later callers get the published
    /// result without calling `prepare`. A failed (or panicking) preparation
    /// is removed from the cache so the next call starts over. Panic cleanup
    /// needs `panic = "unwind"`; under abort the process is gone anyway.
    pub fn prepare_with<F, E>(
        &self,
        address: &str,
        keyspace: &str,
        statement: &str,
        prepare: F,
    ) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: fmt::Display,
    {
        let key = self.key_for(address, keyspace, statement);
        let (flight, found) = self.get_or_create(&key, |store| {
            let flight = InflightPrepare::new();
            store.insert(key.clone(), flight.clone());
            flight
        });

        if found {
            return flight.wait();
        }

        let completer = flight.completer();
        let mut evict = EvictOnDrop {
            cache: self,
            key: &key,
            flight: flight.clone(),
            armed: true,
        };

        match prepare() {
            Ok(prepared) => {
                evict.armed = false;
                completer.complete(Ok(prepared.clone()));
                Ok(prepared)
            }
            Err(err) => {
                debug!(key = %key, error = %err, "statement preparation failed");
                let err = Error::PrepareFailed(err.to_string());
                completer.complete(Err(err.clone()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_once() {
        let flight = InflightPrepare::new();

        assert!(!flight.is_complete());
        assert_eq!(flight.try_get(), None);
        assert!(flight.complete(Ok(1)));
        assert!(!flight.complete(Ok(2)));
        assert!(flight.is_complete());
        assert_eq!(flight.wait(), Ok(1));
    }

    #[test]
    fn test_clones_share_slot() {
        let a = InflightPrepare::new();
        let b = a.clone();

        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&InflightPrepare::new()));

        b.complete(Ok("id"));
        assert_eq!(a.try_get(), Some(Ok("id")));
    }

    #[test]
    fn test_waiters_are_woken() {
        let flight: InflightPrepare<u32> = InflightPrepare::new();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let flight = flight.clone();
                thread::spawn(move || flight.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        flight.complete(Ok(7));

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(7));
        }
    }

    #[test]
    fn test_wait_timeout() {
        let flight: InflightPrepare<u32> = InflightPrepare::new();
        let timeout = Duration::from_millis(10);

        assert_eq!(flight.wait_timeout(timeout), Err(Error::Timeout(timeout)));

        flight.complete(Ok(3));
        assert_eq!(flight.wait_timeout(timeout), Ok(3));
    }

    #[test]
    fn test_dropped_completer_abandons() {
        let flight: InflightPrepare<u32> = InflightPrepare::new();
        drop(flight.completer());

        assert_eq!(flight.wait(), Err(Error::Abandoned));
    }

    #[test]
    fn test_completer_completes() {
        let flight = InflightPrepare::new();
        let completer = flight.completer();

        assert!(completer.complete(Ok(5)));
        assert_eq!(flight.wait(), Ok(5));
    }

    #[test]
    fn test_ready() {
        let flight: InflightPrepare<u32> =
            InflightPrepare::ready(Err(Error::PrepareFailed("boom".into())));
        assert_eq!(flight.try_get(), Some(Err(Error::PrepareFailed("boom".into()))));
        assert_eq!(format!("{flight:?}"), r#"InflightPrepare { state: "failed" }"#);
    }

    #[test]
    fn test_prepare_with_caches_result() {
        let cache: PreparedCache<InflightPrepare<u32>> = PreparedCache::with_capacity(10);
        let mut calls = 0;

        let first = cache.prepare_with("h1", "ks", "SELECT 1", || {
            calls += 1;
            Ok::<_, String>(11)
        });
        let second = cache.prepare_with("h1", "ks", "SELECT 1", || {
            calls += 1;
            Ok::<_, String>(22)
        });

        assert_eq!(first, Ok(11));
        assert_eq!(second, Ok(11));
        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prepare_with_distinct_hosts() {
        let cache: PreparedCache<InflightPrepare<u32>> = PreparedCache::with_capacity(10);

        let a = cache.prepare_with("h1", "ks", "SELECT 1", || Ok::<_, String>(1));
        let b = cache.prepare_with("h2", "ks", "SELECT 1", || Ok::<_, String>(2));

        assert_eq!((a, b), (Ok(1), Ok(2)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_prepare_with_failure_is_not_cached() {
        let cache: PreparedCache<InflightPrepare<u32>> = PreparedCache::with_capacity(10);

        let failed = cache.prepare_with("h1", "ks", "SELEC 1", || Err("syntax error"));
        assert_eq!(failed, Err(Error::PrepareFailed("syntax error".into())));
        assert!(cache.is_empty());

        let retried = cache.prepare_with("h1", "ks", "SELEC 1", || Ok::<_, String>(9));
        assert_eq!(retried, Ok(9));
    }

    #[test]
    fn test_prepare_with_panic_abandons_slot() {
        let cache: PreparedCache<InflightPrepare<u32>> = PreparedCache::with_capacity(10);
        let key = cache.key_for("h1", "ks", "SELECT 1");

        // Another caller already holds the slot
        let (flight, found) = cache.get_or_create(&key, |store| {
            let flight = InflightPrepare::new();
            store.insert(key.clone(), flight.clone());
            flight
        });
        assert!(!found);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.prepare_with("h1", "ks", "SELECT 2", || -> std::result::Result<u32, String> {
                panic!("driver bug")
            })
        }));
        assert!(result.is_err());
        assert!(!cache.contains(&cache.key_for("h1", "ks", "SELECT 2")));

        // The unrelated slot is untouched
        assert!(!flight.is_complete());
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_failed_prepare_keeps_newer_slot() {
        let cache: PreparedCache<InflightPrepare<u32>> = PreparedCache::with_capacity(1);
        let mut inner_calls = 0;

        let outer = cache.prepare_with("h1", "ks", "SELECT a", || {
            // Push our own slot out, then let another caller prepare the same key
            cache.add(cache.key_for("h1", "ks", "SELECT b"), InflightPrepare::ready(Ok(0)));
            let inner = cache.prepare_with("h1", "ks", "SELECT a", || {
                inner_calls += 1;
                Ok::<_, String>(7)
            });
            assert_eq!(inner, Ok(7));
            Err("connection reset")
        });
        assert_eq!(outer, Err(Error::PrepareFailed("connection reset".into())));

        assert!(cache.contains(&cache.key_for("h1", "ks", "SELECT a")));
        let again = cache.prepare_with("h1", "ks", "SELECT a", || Ok::<_, String>(8));
        assert_eq!(again, Ok(7));
        assert_eq!(inner_calls, 1);
    }

    #[test]
    fn test_failed_prepare_of_evicted_slot_leaves_ledger_alone() {
        let cache: PreparedCache<InflightPrepare<u32>> = PreparedCache::with_capacity(1);
        let key = cache.key_for("h1", "ks", "SELECT a");

        for _ in 0..6 {
            let failed = cache.prepare_with("h1", "ks", "SELECT a", || {
                cache.add(cache.key_for("h1", "ks", "SELECT b"), InflightPrepare::ready(Ok(0)));
                Err("timeout")
            });
            assert!(failed.is_err());
        }

        assert_eq!(cache.miss_count(&key), 0);
        assert_eq!(cache.stats().tolerated_misses(), 0);
        assert_eq!(cache.stats().rejected_removals(), 0);
        // The caller's own invalidation is still tolerated as usual
        assert!(cache.remove(&key));
    }
}
