//! Resumable, lock-guarded content downloads with async event reporting.
//!
//! The download manager pulls large binary content into the vault:
//! disk-space preflight, exclusive per-`(content_id, quality)` locking,
//! byte-range resume of interrupted transfers, optional at-rest encryption
//! of the stream, and atomic publication via rename. Progress and terminal
//! outcomes are emitted on an async channel; state is bookkept in `SQLite`
//! and survives restarts.
//!
//! # Example
//!
//! ```ignore
//! use streamvault_core::download::{DownloadManager, TaskKey};
//!
//! let key = TaskKey::new("episode-42", "hd");
//! manager.download(&key, "https://cdn.example.com/ep42-hd").await?;
//! ```

mod error;
mod events;
mod manager;
mod store;
mod task;

pub use error::DownloadError;
pub use events::{DownloadEvent, EVENT_CHANNEL_CAPACITY};
pub use manager::{DEFAULT_MAX_CONCURRENT_DOWNLOADS, DownloadManager};
pub use store::{StoreError, TaskStore};
pub use task::{DownloadState, DownloadTask, TaskKey};
