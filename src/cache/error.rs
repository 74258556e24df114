//! Error types for cache operations.

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database operation failed.
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored payload is malformed.
    ///
    /// Callers never see this from `get`: the corrupt entry is dropped and
    /// reported as a miss. It exists so the corruption path is typed rather
    /// than silently swallowed inside the parse helper.
    #[error("corrupt cache payload for fingerprint {fingerprint}: {reason}")]
    Corrupt {
        /// Cache key of the corrupt entry.
        fingerprint: String,
        /// Parse failure description.
        reason: String,
    },
}
