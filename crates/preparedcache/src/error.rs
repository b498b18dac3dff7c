//! Error types for preparedcache

use std::time::Duration;
use thiserror::Error;

/// Result type alias for preparedcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the fallible cache helpers
///
/// The core cache operations are total; these only come out of
/// `try_remove`, `prepare_with` and waits on an in-flight preparation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A key kept being removed while absent, past the miss tolerance
    #[error("removal of {key} rejected after {attempts} tolerated misses")]
    RemovalRejected {
        /// Rendered form of the offending key
        key: String,
        /// Tolerated misses recorded for the key
        attempts: u32,
    },

    /// Preparation failed; every waiter on the same slot sees this
    #[error("prepare failed: {0}")]
    PrepareFailed(String),

    /// The preparing caller went away without completing the slot
    #[error("in-flight preparation abandoned")]
    Abandoned,

    /// Waiting for an in-flight preparation timed out
    #[error("timed out after {0:?} waiting for preparation")]
    Timeout(Duration),
}
