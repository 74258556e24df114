//! Download orchestration: preflight, locking, the copy loop, and finalize.
//!
//! One [`DownloadManager`] owns all in-flight downloads. Each call to
//! [`DownloadManager::download`] runs as an independent cancellable unit of
//! work holding the exclusive per-`(content_id, quality)` lock for its
//! lifetime, with a global semaphore bounding how many copy loops run at
//! once. Progress, completion, and errors are messages on an async channel;
//! nothing here invokes callbacks.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::crypto::{ContentCipher, EncryptionKeyHandle, file_sha256};
use crate::gateway::{ContentProbe, FailoverBackoff, GatewayClient, GatewayError};
use crate::vault::{DOWNLOAD_HEADROOM_BYTES, Vault};

use super::error::DownloadError;
use super::events::DownloadEvent;
use super::store::TaskStore;
use super::task::{DownloadState, DownloadTask, TaskKey};

/// Default upper bound on simultaneous downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Emit a progress event roughly every this many bytes written.
const PROGRESS_EVENT_INTERVAL_BYTES: u64 = 512 * 1024;

/// Bounded number of sub-range re-fetch attempts for transient mid-stream
/// network errors. User-facing retry beyond this is explicit.
const MAX_SUBRANGE_RETRIES: u32 = 2;

/// What one pass of the copy loop produced.
enum CopyStep {
    /// Stream drained; total bytes now in the `.part` artifact.
    Finished(u64),
    /// Cancellation signal observed; bytes flushed so far.
    Cancelled(u64),
}

/// Terminal outcome of a download run.
enum RunOutcome {
    Completed,
    Cancelled,
}

/// Removes the per-key lock entry when a download run ends, however it ends.
struct ActiveGuard {
    active: Arc<DashMap<TaskKey, CancellationToken>>,
    key: TaskKey,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

/// Orchestrates resumable downloads into the vault.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    gateway: Arc<GatewayClient>,
    store: TaskStore,
    vault: Vault,
    encryption_key: Option<EncryptionKeyHandle>,
    active: Arc<DashMap<TaskKey, CancellationToken>>,
    permits: Arc<Semaphore>,
    backoff: FailoverBackoff,
    events: mpsc::Sender<DownloadEvent>,
}

impl DownloadManager {
    /// Creates a download manager without encryption.
    #[must_use]
    pub fn new(
        gateway: Arc<GatewayClient>,
        store: TaskStore,
        vault: Vault,
        events: mpsc::Sender<DownloadEvent>,
    ) -> Self {
        Self {
            gateway,
            store,
            vault,
            encryption_key: None,
            active: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_DOWNLOADS)),
            backoff: FailoverBackoff::default(),
            events,
        }
    }

    /// Enables at-rest encryption with the given key handle. Ciphertext is
    /// written to disk; plaintext is never persisted.
    #[must_use]
    pub fn with_encryption(mut self, key: EncryptionKeyHandle) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Replaces the global concurrency cap.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    /// True when downloads are encrypted at rest.
    #[must_use]
    pub fn encryption_enabled(&self) -> bool {
        self.encryption_key.is_some()
    }

    /// Downloads content into the vault.
    ///
    /// Holds the exclusive `(content_id, quality)` lock for the whole run:
    /// a concurrent call for the same key fails fast with
    /// [`DownloadError::LockContention`]. Resumes from an existing `.part`
    /// artifact when the source supports byte ranges; otherwise restarts.
    /// On success the artifact is atomically renamed into place and a
    /// completion event is emitted.
    ///
    /// Cancellation (via [`DownloadManager::cancel`]) is not an error: the
    /// run flushes what it wrote, parks the task as `Paused`, and returns
    /// `Ok`.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] describing the first unrecoverable
    /// failure; transient mid-stream network errors are retried as bounded
    /// sub-range re-fetches first.
    #[instrument(skip(self, source_url), fields(key = %key))]
    pub async fn download(&self, key: &TaskKey, source_url: &str) -> Result<(), DownloadError> {
        let url = Url::parse(source_url)
            .map_err(|_| DownloadError::Network(GatewayError::invalid_url(source_url)))?;

        // Already downloaded and still on disk: idempotent completion.
        if let Some(task) = self.store.get(key).await?
            && task.state() == DownloadState::Completed
            && Path::new(&task.final_path).exists()
        {
            debug!("content already in vault");
            self.emit(DownloadEvent::Completed {
                content_id: key.content_id.clone(),
                quality: key.quality.clone(),
            })
            .await;
            return Ok(());
        }

        // Exclusive lock per (content_id, quality) for the run's lifetime.
        let token = CancellationToken::new();
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => return Err(DownloadError::lock_contention(key)),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        let _active = ActiveGuard {
            active: Arc::clone(&self.active),
            key: key.clone(),
        };

        // Global concurrency cap. Permit released on drop (RAII).
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::Shutdown)?;

        let final_path = self.vault.final_path(&key.content_id, &key.quality);
        let temp_path = self.vault.temp_path(&key.content_id, &key.quality);

        match self.run(key, &url, &final_path, &temp_path, token).await {
            Ok(RunOutcome::Completed) => {
                self.emit(DownloadEvent::Completed {
                    content_id: key.content_id.clone(),
                    quality: key.quality.clone(),
                })
                .await;
                Ok(())
            }
            Ok(RunOutcome::Cancelled) => {
                info!("download cancelled, artifact kept for resume");
                Ok(())
            }
            Err(error) => {
                // A corrupt artifact cannot seed a resume; anything else stays.
                if error.is_corruption() {
                    if let Err(e) = self.vault.remove_temp(&temp_path).await {
                        warn!(error = %e, "failed to remove corrupt artifact");
                    }
                }
                if let Err(e) = self.store.mark_failed(key, &error.to_string()).await {
                    warn!(error = %e, "failed to record download failure");
                }
                self.emit(DownloadEvent::Failed {
                    content_id: key.content_id.clone(),
                    quality: key.quality.clone(),
                    reason: error.to_string(),
                })
                .await;
                Err(error)
            }
        }
    }

    /// Signals the in-flight download for `key` to stop cooperatively.
    /// Returns true when a download was active.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        if let Some(entry) = self.active.get(key) {
            entry.value().cancel();
            true
        } else {
            false
        }
    }

    /// Current bookkeeping record for a task.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::TaskStore`] if the lookup fails.
    pub async fn status(&self, key: &TaskKey) -> Result<Option<DownloadTask>, DownloadError> {
        Ok(self.store.get(key).await?)
    }

    /// The full download run: preflight, copy with bounded sub-range
    /// retries, and finalize.
    async fn run(
        &self,
        key: &TaskKey,
        url: &Url,
        final_path: &Path,
        temp_path: &Path,
        token: CancellationToken,
    ) -> Result<RunOutcome, DownloadError> {
        self.store
            .upsert_pending(
                key,
                url.as_str(),
                final_path,
                temp_path,
                self.encryption_key.is_some(),
            )
            .await?;

        // Size probe; a source without HEAD support is not fatal.
        let probe = match self.gateway.probe_content(url).await {
            Ok(probe) => probe,
            Err(error) => {
                debug!(error = %error, "HEAD probe failed, proceeding without it");
                ContentProbe {
                    content_length: None,
                    accept_ranges: false,
                }
            }
        };
        let mut expected_size = probe.content_length;

        // Disk preflight: expected size plus fixed headroom.
        let available = self
            .vault
            .available_space()
            .map_err(|e| DownloadError::io(self.vault.root(), e))?;
        space_check(expected_size, available)?;

        // Resume only when a partial artifact exists AND the source serves
        // byte ranges; otherwise restart from zero.
        let partial = self.vault.partial_size(temp_path).await;
        let resume_supported = probe.accept_ranges;
        let mut offset = if partial > 0 && resume_supported {
            info!(resume_from = partial, "resuming interrupted download");
            partial
        } else {
            if partial > 0 {
                debug!("source does not serve ranges, restarting from zero");
                self.vault
                    .remove_temp(temp_path)
                    .await
                    .map_err(|e| DownloadError::io(temp_path, e))?;
            }
            0
        };

        self.store.mark_in_progress(key).await?;

        let cipher = self
            .encryption_key
            .as_ref()
            .map(|handle| ContentCipher::new(handle, &key.content_id, &key.quality));

        // Copy loop with bounded sub-range re-fetch on transient errors.
        let mut retries = 0_u32;
        let total_bytes = loop {
            let step = self
                .copy_once(
                    key,
                    url,
                    &token,
                    cipher.as_ref(),
                    temp_path,
                    offset,
                    &mut expected_size,
                )
                .await;

            match step {
                Ok(CopyStep::Finished(bytes)) => break bytes,
                Ok(CopyStep::Cancelled(bytes)) => {
                    self.store.mark_paused(key, bytes).await?;
                    return Ok(RunOutcome::Cancelled);
                }
                Err(error) if is_transient(&error) => {
                    if retries >= MAX_SUBRANGE_RETRIES {
                        return Err(error);
                    }
                    retries += 1;
                    // Without range support the next pass restarts from zero
                    // (a 200 response truncates the artifact).
                    offset = if resume_supported {
                        self.vault.partial_size(temp_path).await
                    } else {
                        0
                    };
                    let delay = self.backoff.delay_after(retries);
                    warn!(
                        error = %error,
                        retry = retries,
                        resume_from = offset,
                        delay_ms = delay.as_millis(),
                        "transient stream error, re-fetching sub-range"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        };

        // Integrity heuristic: final size must match the expected size.
        if let Some(expected) = expected_size
            && total_bytes != expected
        {
            return Err(DownloadError::integrity(temp_path, expected, total_bytes));
        }

        // Record the whole-file checksum, then publish atomically.
        let checksum = file_sha256(temp_path)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        self.vault
            .finalize(temp_path, final_path)
            .await
            .map_err(|e| DownloadError::io(final_path, e))?;
        self.store.mark_completed(key, total_bytes, &checksum).await?;

        info!(bytes = total_bytes, path = %final_path.display(), "download complete");
        Ok(RunOutcome::Completed)
    }

    /// One streaming pass: GET (ranged when resuming), write chunks through
    /// the optional cipher, emit periodic progress, honor cancellation.
    #[allow(clippy::too_many_arguments)]
    async fn copy_once(
        &self,
        key: &TaskKey,
        url: &Url,
        token: &CancellationToken,
        cipher: Option<&ContentCipher>,
        temp_path: &Path,
        offset: u64,
        expected_size: &mut Option<u64>,
    ) -> Result<CopyStep, DownloadError> {
        let range = (offset > 0).then(|| format!("bytes={offset}-"));
        let response = self.gateway.fetch_content(url, range.as_deref()).await?;
        let status = response.status().as_u16();

        // A 200 despite our Range header means the server restarted the body.
        let write_offset = if offset > 0 && status != 206 {
            debug!("server ignored range request, restarting from zero");
            0
        } else {
            offset
        };

        // The GET response's length supersedes the HEAD probe: for a 206
        // the total is the resume offset plus the remaining body.
        if let Some(body_len) = response.content_length() {
            let total = if status == 206 {
                write_offset.saturating_add(body_len)
            } else {
                body_len
            };
            *expected_size = Some(total);
        }

        let file = if write_offset > 0 {
            OpenOptions::new()
                .append(true)
                .open(temp_path)
                .await
                .map_err(|e| DownloadError::io(temp_path, e))?
        } else {
            File::create(temp_path)
                .await
                .map_err(|e| DownloadError::io(temp_path, e))?
        };
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();

        let mut bytes_written = write_offset;
        let mut last_progress = bytes_written;

        loop {
            tokio::select! {
                // Cancellation wins over a ready chunk so a cancel request
                // never races an arbitrarily long stream to the finish.
                biased;

                () = token.cancelled() => {
                    writer
                        .flush()
                        .await
                        .map_err(|e| DownloadError::io(temp_path, e))?;
                    return Ok(CopyStep::Cancelled(bytes_written));
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.map_err(|e| {
                        DownloadError::Network(GatewayError::network(url.as_str(), e))
                    })?;

                    let mut buf = chunk.to_vec();
                    if let Some(cipher) = cipher {
                        cipher.encrypt_at(bytes_written, &mut buf);
                    }
                    writer
                        .write_all(&buf)
                        .await
                        .map_err(|e| DownloadError::io(temp_path, e))?;
                    bytes_written += buf.len() as u64;

                    if bytes_written - last_progress >= PROGRESS_EVENT_INTERVAL_BYTES {
                        last_progress = bytes_written;
                        self.emit_progress(key, bytes_written, *expected_size);
                        if let Err(e) = self
                            .store
                            .update_progress(key, bytes_written, *expected_size)
                            .await
                        {
                            warn!(error = %e, "failed to persist progress");
                        }
                    }
                }
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;

        self.emit_progress(key, bytes_written, *expected_size);
        if let Err(e) = self
            .store
            .update_progress(key, bytes_written, *expected_size)
            .await
        {
            warn!(error = %e, "failed to persist progress");
        }

        Ok(CopyStep::Finished(bytes_written))
    }

    /// Progress ticks use `try_send`: a slow consumer drops ticks instead
    /// of blocking the copy loop.
    fn emit_progress(&self, key: &TaskKey, bytes: u64, total: Option<u64>) {
        let _ = self.events.try_send(DownloadEvent::Progress {
            content_id: key.content_id.clone(),
            quality: key.quality.clone(),
            bytes,
            total,
        });
    }

    /// Terminal events are awaited; the copy loop is already done by then.
    async fn emit(&self, event: DownloadEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

fn is_transient(error: &DownloadError) -> bool {
    matches!(error, DownloadError::Network(gateway) if gateway.is_transient())
}

/// Rejects a download whose expected size plus headroom exceeds the free
/// space on the vault filesystem.
fn space_check(expected_size: Option<u64>, available: u64) -> Result<(), DownloadError> {
    let needed = expected_size
        .unwrap_or(0)
        .saturating_add(DOWNLOAD_HEADROOM_BYTES);
    if available < needed {
        return Err(DownloadError::insufficient_space(needed, available));
    }
    Ok(())
}
