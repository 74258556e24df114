//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and user feedback.

use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::KeystoreError;
use crate::gateway::GatewayError;

use super::store::StoreError;
use super::task::TaskKey;

/// Errors that can occur while downloading content into the vault.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The source could not be reached (transport failure or error status).
    #[error("network error: {0}")]
    Network(#[from] GatewayError),

    /// The vault's filesystem lacks room for the download plus headroom.
    #[error(
        "insufficient disk space: need {needed_bytes} bytes (incl. headroom), {available_bytes} available"
    )]
    InsufficientSpace {
        /// Bytes required, including the fixed headroom.
        needed_bytes: u64,
        /// Bytes currently available on the vault filesystem.
        available_bytes: u64,
    },

    /// Another download for the same `(content_id, quality)` is in flight.
    #[error("download already in progress for {content_id} ({quality})")]
    LockContention {
        /// Content identifier of the contended download.
        content_id: String,
        /// Quality variant of the contended download.
        quality: String,
    },

    /// The content encryption key is unavailable.
    #[error("encryption key unavailable: {0}")]
    Encryption(#[from] KeystoreError),

    /// Downloaded size does not match the expected content length.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Download artifact that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// File system error during download (create file, write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Task bookkeeping failed.
    #[error("task store error: {0}")]
    TaskStore(#[from] StoreError),

    /// The download manager is shutting down and accepts no new work.
    #[error("download manager is shutting down")]
    Shutdown,
}

impl DownloadError {
    /// Creates an insufficient-space error.
    #[must_use]
    pub fn insufficient_space(needed_bytes: u64, available_bytes: u64) -> Self {
        Self::InsufficientSpace {
            needed_bytes,
            available_bytes,
        }
    }

    /// Creates a lock-contention error for a task key.
    #[must_use]
    pub fn lock_contention(key: &TaskKey) -> Self {
        Self::LockContention {
            content_id: key.content_id.clone(),
            quality: key.quality.clone(),
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the failure indicates the on-disk artifact is corrupt and
    /// must not seed a future resume.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}
