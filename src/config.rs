//! Core configuration consumed by [`crate::service::ContentService`].

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::download::DEFAULT_MAX_CONCURRENT_DOWNLOADS;

/// Configuration for the content-delivery core.
///
/// The endpoint list is priority-ordered: index 0 is tried first. The order
/// is fixed for the lifetime of the process; changing it means building a
/// new service (explicit, user-initiated reconfiguration).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding downloaded media files.
    pub vault_dir: PathBuf,
    /// SQLite database path. `None` uses an in-memory database.
    pub db_path: Option<PathBuf>,
    /// Gateway endpoints in priority order (nominally 3).
    pub endpoints: Vec<Url>,
    /// Default cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Maximum number of cache entries before eviction.
    pub cache_capacity: usize,
    /// Upper bound on simultaneous downloads.
    pub max_concurrent_downloads: usize,
    /// Encrypt downloaded content at rest.
    pub encrypt_downloads: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            vault_dir: PathBuf::from("vault"),
            db_path: None,
            endpoints: Vec::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            encrypt_downloads: false,
        }
    }
}

impl CoreConfig {
    /// Creates a config with the given vault directory and endpoint list,
    /// using defaults for everything else.
    #[must_use]
    pub fn new(vault_dir: impl Into<PathBuf>, endpoints: Vec<Url>) -> Self {
        Self {
            vault_dir: vault_dir.into(),
            endpoints,
            ..Self::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = CoreConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(30 * 60));
        assert_eq!(config.cache_capacity, 150);
        assert_eq!(config.max_concurrent_downloads, 4);
        assert!(!config.encrypt_downloads);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_new_keeps_endpoint_order() {
        let endpoints = vec![
            Url::parse("https://g1.example.com").unwrap(),
            Url::parse("https://g2.example.com").unwrap(),
        ];
        let config = CoreConfig::new("/tmp/vault", endpoints.clone());
        assert_eq!(config.endpoints, endpoints);
        assert_eq!(config.vault_dir, PathBuf::from("/tmp/vault"));
    }
}
