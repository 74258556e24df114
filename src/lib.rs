//! Streamvault Core Library
//!
//! This library implements the resilient content-delivery core of a desktop
//! streaming client: fetching remote metadata through prioritized, unreliable
//! gateway endpoints, downloading large media files with resume and atomic
//! finalization, serving finalized files to a local player over an HTTP
//! byte-range protocol with on-the-fly decryption, and caching metadata with
//! TTL-based invalidation.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`gateway`] - Failover HTTP client over a fixed priority-ordered endpoint list
//! - [`cache`] - TTL-bounded metadata cache backed by `SQLite`
//! - [`download`] - Resumable, lock-guarded download manager with async events
//! - [`server`] - Loopback byte-range streaming server for local playback
//! - [`vault`] - Local media storage: paths, disk-space checks, atomic finalize
//! - [`crypto`] - Content encryption key handle and offset-addressable cipher
//! - [`db`] - Database connection and schema management
//! - [`service`] - Application-facing facade tying the components together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod download;
pub mod gateway;
pub mod server;
pub mod service;
pub mod vault;

// Re-export commonly used types
pub use cache::{CacheError, CacheManager, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use config::CoreConfig;
pub use crypto::{ContentCipher, EncryptionKeyHandle, KeystoreError};
pub use db::Database;
pub use download::{
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DownloadError, DownloadEvent, DownloadManager, DownloadState,
    DownloadTask, TaskKey, TaskStore,
};
pub use gateway::{
    AttemptFailure, Endpoint, EndpointRegistry, GatewayClient, GatewayError, GatewayRequest,
    GatewayResponse, MetadataGateway,
};
pub use server::{StreamServer, StreamServerHandle};
pub use service::{ContentService, ServiceError, StreamHandle};
pub use vault::Vault;
