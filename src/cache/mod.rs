//! TTL-bounded metadata cache backed by `SQLite`.
//!
//! Stores gateway metadata responses keyed by request fingerprint. An entry
//! is fresh iff `now - stored_at < ttl`; freshness is a pure function of
//! those three values with no side effects. The collection is bounded: when
//! an insert pushes the entry count past the capacity, the oldest entries
//! (by `stored_at`) are evicted first.
//!
//! The cache never fetches. On a miss or stale entry `get` returns `None`
//! and the caller (the service read-through path) refetches via the gateway
//! and calls `put`.
//!
//! # Example
//!
//! ```ignore
//! use streamvault_core::{CacheManager, Database};
//!
//! let db = Database::new_in_memory().await?;
//! let cache = CacheManager::new(db);
//!
//! cache.put("fp-1", &serde_json::json!({"title": "Ep 1"}), &["catalog"]).await?;
//! let hit = cache.get("fp-1").await?;
//! assert!(hit.is_some());
//! ```

mod error;

pub use error::CacheError;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use sqlx::Row;
use tracing::{debug, instrument, warn};

use crate::db::Database;

/// Default entry time-to-live (30 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Default maximum entry count before eviction.
pub const DEFAULT_CACHE_CAPACITY: usize = 150;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Returns true when an entry stored at `stored_at` with `ttl_secs` is
/// still fresh at `now` (both unix seconds). Pure function, no side effects.
#[must_use]
pub fn is_fresh(now: i64, stored_at: i64, ttl_secs: i64) -> bool {
    now.saturating_sub(stored_at) < ttl_secs
}

/// Current unix time in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Metadata cache manager.
///
/// Concurrent readers never block each other (pooled `SQLite` reads, WAL);
/// writers are single-key upserts. Shareable by clone.
#[derive(Debug, Clone)]
pub struct CacheManager {
    db: Database,
    default_ttl: Duration,
    capacity: usize,
}

impl CacheManager {
    /// Creates a cache manager with the default TTL and capacity.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_settings(db, DEFAULT_CACHE_TTL, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a cache manager with explicit TTL and capacity.
    #[must_use]
    pub fn with_settings(db: Database, default_ttl: Duration, capacity: usize) -> Self {
        Self {
            db,
            default_ttl,
            capacity: capacity.max(1),
        }
    }

    /// Returns the cached payload when the entry exists and is fresh.
    ///
    /// A stale entry is deleted lazily and reported as a miss. A corrupt
    /// payload is likewise dropped and reported as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the underlying query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, fingerprint: &str) -> Result<Option<Value>> {
        self.get_at(fingerprint, unix_now()).await
    }

    /// Freshness-checked lookup with an explicit clock, so TTL behavior is
    /// testable without waiting.
    pub(crate) async fn get_at(&self, fingerprint: &str, now: i64) -> Result<Option<Value>> {
        let row = sqlx::query(
            "SELECT payload, stored_at, ttl_secs FROM cache_entries WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stored_at: i64 = row.get("stored_at");
        let ttl_secs: i64 = row.get("ttl_secs");

        if !is_fresh(now, stored_at, ttl_secs) {
            debug!(fingerprint, "cache entry stale, dropping");
            self.delete(fingerprint).await?;
            return Ok(None);
        }

        let payload: String = row.get("payload");
        match parse_payload(fingerprint, &payload) {
            Ok(value) => Ok(Some(value)),
            Err(corrupt) => {
                // Corrupt entries are dropped and treated as a miss.
                warn!(fingerprint, error = %corrupt, "dropping corrupt cache entry");
                self.delete(fingerprint).await?;
                Ok(None)
            }
        }
    }

    /// Upserts an entry with `stored_at = now` and the default TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the upsert fails.
    #[instrument(skip(self, payload))]
    pub async fn put(&self, fingerprint: &str, payload: &Value, tags: &[&str]) -> Result<()> {
        self.put_with_ttl(fingerprint, payload, tags, self.default_ttl)
            .await
    }

    /// Upserts an entry with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the upsert fails.
    #[instrument(skip(self, payload))]
    pub async fn put_with_ttl(
        &self,
        fingerprint: &str,
        payload: &Value,
        tags: &[&str],
        ttl: Duration,
    ) -> Result<()> {
        self.put_at(fingerprint, payload, tags, ttl, unix_now())
            .await
    }

    /// Upsert with an explicit clock (test seam).
    pub(crate) async fn put_at(
        &self,
        fingerprint: &str,
        payload: &Value,
        tags: &[&str],
        ttl: Duration,
        now: i64,
    ) -> Result<()> {
        let tags_json = if tags.is_empty() {
            None
        } else {
            serde_json::to_string(tags).ok()
        };
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        sqlx::query(
            r"INSERT INTO cache_entries (fingerprint, payload, tags, stored_at, ttl_secs)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT(fingerprint) DO UPDATE SET
                  payload = excluded.payload,
                  tags = excluded.tags,
                  stored_at = excluded.stored_at,
                  ttl_secs = excluded.ttl_secs",
        )
        .bind(fingerprint)
        .bind(payload.to_string())
        .bind(tags_json)
        .bind(now)
        .bind(ttl_secs)
        .execute(self.db.pool())
        .await?;

        self.evict_over_capacity().await
    }

    /// Removes a single entry. Returns true when the entry existed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, fingerprint: &str) -> Result<bool> {
        Ok(self.delete(fingerprint).await? > 0)
    }

    /// Removes every entry carrying any of the given tags. Returns the
    /// number of entries removed.
    ///
    /// Tags are plain identifiers (e.g. `catalog`, `series-7`); matching is
    /// on the exact tag value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn invalidate_by_tag(&self, tags: &[&str]) -> Result<u64> {
        let mut removed = 0_u64;
        for tag in tags {
            // Tags are stored as a JSON array of strings, so an exact tag
            // always appears quoted.
            let pattern = format!("%\"{tag}\"%");
            let result = sqlx::query("DELETE FROM cache_entries WHERE tags LIKE ?")
                .bind(pattern)
                .execute(self.db.pool())
                .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Removes all entries. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of entries currently stored (fresh or not).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the count query fails.
    pub async fn len(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cache_entries")
            .fetch_one(self.db.pool())
            .await?;
        let count: i64 = row.get("n");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns true when the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the count query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn delete(&self, fingerprint: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Evicts oldest-`stored_at` entries until the count is within capacity.
    async fn evict_over_capacity(&self) -> Result<()> {
        let count = self.len().await?;
        let capacity = u64::try_from(self.capacity).unwrap_or(u64::MAX);
        if count <= capacity {
            return Ok(());
        }

        let excess = i64::try_from(count - capacity).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r"DELETE FROM cache_entries WHERE fingerprint IN (
                  SELECT fingerprint FROM cache_entries
                  ORDER BY stored_at ASC
                  LIMIT ?
              )",
        )
        .bind(excess)
        .execute(self.db.pool())
        .await?;

        debug!(evicted = result.rows_affected(), "cache capacity eviction");
        Ok(())
    }
}

fn parse_payload(fingerprint: &str, payload: &str) -> std::result::Result<Value, CacheError> {
    serde_json::from_str(payload).map_err(|e| CacheError::Corrupt {
        fingerprint: fingerprint.to_string(),
        reason: e.to_string(),
    })
}
