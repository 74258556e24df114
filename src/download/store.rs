//! `SQLite` bookkeeping for download tasks.
//!
//! Persists [`DownloadTask`] records keyed by `(content_id, quality)` so
//! interrupted downloads survive restarts with their byte counts intact.
//! All writes are short single-key statements.

use std::path::Path;

use sqlx::Row;
use thiserror::Error;
use tracing::instrument;

use crate::db::Database;

use super::task::{DownloadState, DownloadTask, TaskKey};

/// Errors for task bookkeeping operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("task database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No task exists for the given key.
    #[error("no download task for {content_id} ({quality})")]
    TaskNotFound {
        /// Content identifier of the missing task.
        content_id: String,
        /// Quality variant of the missing task.
        quality: String,
    },
}

impl StoreError {
    fn not_found(key: &TaskKey) -> Self {
        Self::TaskNotFound {
            content_id: key.content_id.clone(),
            quality: key.quality.clone(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise
/// [`StoreError::TaskNotFound`].
fn check_affected(key: &TaskKey, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::not_found(key))
    } else {
        Ok(())
    }
}

/// Download task store over the shared database pool.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Creates a task store with the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates or resets a task to `Pending` for a new download attempt.
    ///
    /// On conflict the existing row keeps its `bytes_written` (a preserved
    /// `.part` artifact may seed a resume) but takes the new source URL and
    /// paths, and clears any previous error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, final_path, temp_path), fields(key = %key))]
    pub async fn upsert_pending(
        &self,
        key: &TaskKey,
        source_url: &str,
        final_path: &Path,
        temp_path: &Path,
        encrypted: bool,
    ) -> Result<()> {
        sqlx::query(
            r"INSERT INTO download_tasks
                  (content_id, quality, source_url, final_path, temp_path, state, encrypted)
              VALUES (?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(content_id, quality) DO UPDATE SET
                  source_url = excluded.source_url,
                  final_path = excluded.final_path,
                  temp_path = excluded.temp_path,
                  state = excluded.state,
                  encrypted = excluded.encrypted,
                  last_error = NULL,
                  updated_at = datetime('now')",
        )
        .bind(&key.content_id)
        .bind(&key.quality)
        .bind(source_url)
        .bind(final_path.to_string_lossy().into_owned())
        .bind(temp_path.to_string_lossy().into_owned())
        .bind(DownloadState::Pending.as_str())
        .bind(encrypted)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Transitions a task to `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists for the key.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn mark_in_progress(&self, key: &TaskKey) -> Result<()> {
        self.set_state(key, DownloadState::InProgress).await
    }

    /// Transitions a task to `Paused`, recording the bytes flushed so far.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists for the key.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn mark_paused(&self, key: &TaskKey, bytes_written: u64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE download_tasks
              SET state = ?, bytes_written = ?, updated_at = datetime('now')
              WHERE content_id = ? AND quality = ?",
        )
        .bind(DownloadState::Paused.as_str())
        .bind(to_i64(bytes_written))
        .bind(&key.content_id)
        .bind(&key.quality)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }

    /// Transitions a task to `Completed`, recording the final size and the
    /// whole-file checksum computed at finalize time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists for the key.
    #[instrument(skip(self, checksum), fields(key = %key))]
    pub async fn mark_completed(
        &self,
        key: &TaskKey,
        bytes_written: u64,
        checksum: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE download_tasks
              SET state = ?, bytes_written = ?, checksum = ?, last_error = NULL,
                  updated_at = datetime('now')
              WHERE content_id = ? AND quality = ?",
        )
        .bind(DownloadState::Completed.as_str())
        .bind(to_i64(bytes_written))
        .bind(checksum)
        .bind(&key.content_id)
        .bind(&key.quality)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }

    /// Transitions a task to `Failed` with an error message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists for the key.
    #[instrument(skip(self), fields(key = %key, error = %error))]
    pub async fn mark_failed(&self, key: &TaskKey, error: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE download_tasks
              SET state = ?, last_error = ?, updated_at = datetime('now')
              WHERE content_id = ? AND quality = ?",
        )
        .bind(DownloadState::Failed.as_str())
        .bind(error)
        .bind(&key.content_id)
        .bind(&key.quality)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }

    /// Updates progress counters for a running task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists for the key.
    pub async fn update_progress(
        &self,
        key: &TaskKey,
        bytes_written: u64,
        expected_size: Option<u64>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE download_tasks
              SET bytes_written = ?, expected_size = ?, updated_at = datetime('now')
              WHERE content_id = ? AND quality = ?",
        )
        .bind(to_i64(bytes_written))
        .bind(expected_size.map(to_i64))
        .bind(&key.content_id)
        .bind(&key.quality)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }

    /// Fetches the task for a key, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &TaskKey) -> Result<Option<DownloadTask>> {
        let task = sqlx::query_as::<_, DownloadTask>(
            "SELECT * FROM download_tasks WHERE content_id = ? AND quality = ?",
        )
        .bind(&key.content_id)
        .bind(&key.quality)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(task)
    }

    /// Lists all tasks, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list(&self) -> Result<Vec<DownloadTask>> {
        let tasks = sqlx::query_as::<_, DownloadTask>(
            "SELECT * FROM download_tasks ORDER BY updated_at DESC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(tasks)
    }

    /// Counts tasks in a given state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_by_state(&self, state: DownloadState) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM download_tasks WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("n"))
    }

    async fn set_state(&self, key: &TaskKey, state: DownloadState) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE download_tasks
              SET state = ?, updated_at = datetime('now')
              WHERE content_id = ? AND quality = ?",
        )
        .bind(state.as_str())
        .bind(&key.content_id)
        .bind(&key.quality)
        .execute(self.db.pool())
        .await?;

        check_affected(key, result.rows_affected())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn test_store() -> TaskStore {
        let db = Database::new_in_memory().await.unwrap();
        TaskStore::new(db)
    }

    fn sample_key() -> TaskKey {
        TaskKey::new("episode-42", "hd")
    }

    async fn insert_sample(store: &TaskStore, key: &TaskKey) {
        store
            .upsert_pending(
                key,
                "https://cdn.example.com/ep42-hd",
                &PathBuf::from("/vault/episode-42_hd.media"),
                &PathBuf::from("/vault/episode-42_hd.media.part"),
                false,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let store = test_store().await;
        let key = sample_key();
        insert_sample(&store, &key).await;

        let task = store.get(&key).await.unwrap().unwrap();
        assert_eq!(task.state(), DownloadState::Pending);
        assert_eq!(task.source_url, "https://cdn.example.com/ep42-hd");
        assert_eq!(task.bytes_written, 0);
        assert!(!task.encrypted);
        assert!(task.checksum.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = test_store().await;
        assert!(store.get(&sample_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_to_completed() {
        let store = test_store().await;
        let key = sample_key();
        insert_sample(&store, &key).await;

        store.mark_in_progress(&key).await.unwrap();
        assert_eq!(
            store.get(&key).await.unwrap().unwrap().state(),
            DownloadState::InProgress
        );

        store.update_progress(&key, 1024, Some(4096)).await.unwrap();
        let task = store.get(&key).await.unwrap().unwrap();
        assert_eq!(task.bytes_written, 1024);
        assert_eq!(task.expected_size, Some(4096));

        store.mark_completed(&key, 4096, "deadbeef").await.unwrap();
        let task = store.get(&key).await.unwrap().unwrap();
        assert_eq!(task.state(), DownloadState::Completed);
        assert_eq!(task.bytes_written, 4096);
        assert_eq!(task.checksum.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn test_mark_failed_records_error() {
        let store = test_store().await;
        let key = sample_key();
        insert_sample(&store, &key).await;
        store.mark_in_progress(&key).await.unwrap();

        store.mark_failed(&key, "connection reset").await.unwrap();
        let task = store.get(&key).await.unwrap().unwrap();
        assert_eq!(task.state(), DownloadState::Failed);
        assert_eq!(task.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_reupsert_preserves_bytes_and_clears_error() {
        let store = test_store().await;
        let key = sample_key();
        insert_sample(&store, &key).await;
        store.mark_in_progress(&key).await.unwrap();
        store.update_progress(&key, 2048, Some(8192)).await.unwrap();
        store.mark_failed(&key, "timeout").await.unwrap();

        // Explicit retry: back to pending, bytes preserved for resume
        insert_sample(&store, &key).await;
        let task = store.get(&key).await.unwrap().unwrap();
        assert_eq!(task.state(), DownloadState::Pending);
        assert_eq!(task.bytes_written, 2048);
        assert!(task.last_error.is_none());
    }

    #[tokio::test]
    async fn test_mark_paused_records_bytes() {
        let store = test_store().await;
        let key = sample_key();
        insert_sample(&store, &key).await;
        store.mark_in_progress(&key).await.unwrap();

        store.mark_paused(&key, 777).await.unwrap();
        let task = store.get(&key).await.unwrap().unwrap();
        assert_eq!(task.state(), DownloadState::Paused);
        assert_eq!(task.bytes_written, 777);
    }

    #[tokio::test]
    async fn test_updates_on_missing_task_fail() {
        let store = test_store().await;
        let key = sample_key();

        assert!(matches!(
            store.mark_in_progress(&key).await,
            Err(StoreError::TaskNotFound { .. })
        ));
        assert!(matches!(
            store.mark_failed(&key, "x").await,
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let store = test_store().await;
        let key_a = TaskKey::new("a", "hd");
        let key_b = TaskKey::new("b", "hd");
        insert_sample(&store, &key_a).await;
        insert_sample(&store, &key_b).await;
        store.mark_in_progress(&key_a).await.unwrap();

        assert_eq!(
            store.count_by_state(DownloadState::Pending).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .count_by_state(DownloadState::InProgress)
                .await
                .unwrap(),
            1
        );
    }
}
