//! Application-facing facade over the content-delivery core.
//!
//! [`ContentService`] wires the cache, gateway, download manager, and
//! streaming server together and exposes the operations the command layer
//! consumes: read-through metadata fetches, download initiation and
//! cancellation, status queries, and local playback URLs. Outcomes of
//! spawned work arrive on the event channel returned by
//! [`ContentService::new`].

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument};

use crate::cache::{CacheError, CacheManager};
use crate::config::CoreConfig;
use crate::crypto::{EncryptionKeyHandle, KeystoreError};
use crate::db::{Database, DbError};
use crate::download::{
    DownloadError, DownloadEvent, DownloadManager, DownloadState, DownloadTask,
    EVENT_CHANNEL_CAPACITY, StoreError, TaskKey, TaskStore,
};
use crate::gateway::{
    EndpointHealthSnapshot, EndpointRegistry, GatewayClient, GatewayError, GatewayRequest,
    MetadataGateway,
};
use crate::server::{ServerError, StreamServer, StreamServerHandle};
use crate::vault::Vault;

/// Local playback location for a downloaded piece of content.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamHandle {
    /// Full URL the player should open.
    pub url: String,
    /// Loopback port of the streaming server.
    pub port: u16,
}

/// Errors surfaced by the service facade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Database setup failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Vault directory could not be opened.
    #[error("failed to open vault: {0}")]
    Vault(#[from] std::io::Error),

    /// Encryption key could not be obtained.
    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    /// Metadata fetch failed after failover.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Download operation failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Task bookkeeping failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Streaming server failed to start.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// A gateway payload was not valid JSON.
    #[error("malformed metadata payload: {reason}")]
    InvalidMetadata {
        /// Parse failure description.
        reason: String,
    },

    /// Playback was requested for content that is not in the vault.
    #[error("content {content_id} ({quality}) is not downloaded")]
    NotDownloaded {
        /// Content identifier requested.
        content_id: String,
        /// Quality variant requested.
        quality: String,
    },
}

/// The content-delivery core's front door.
pub struct ContentService {
    cache: CacheManager,
    metadata: Arc<dyn MetadataGateway>,
    gateway: Arc<GatewayClient>,
    manager: DownloadManager,
    store: TaskStore,
    encryption_key: Option<EncryptionKeyHandle>,
    events: mpsc::Sender<DownloadEvent>,
    server: Mutex<Option<StreamServerHandle>>,
}

impl ContentService {
    /// Builds the core from configuration. Returns the service plus the
    /// receiving end of the event channel.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the database, vault, or keystore
    /// cannot be initialized.
    #[instrument(skip(config), fields(vault = %config.vault_dir.display()))]
    pub async fn new(
        config: CoreConfig,
    ) -> Result<(Self, mpsc::Receiver<DownloadEvent>), ServiceError> {
        let db = match &config.db_path {
            Some(path) => Database::new(path).await?,
            None => Database::new_in_memory().await?,
        };

        let cache =
            CacheManager::with_settings(db.clone(), config.cache_ttl, config.cache_capacity);
        let store = TaskStore::new(db);
        let vault = Vault::open(&config.vault_dir)?;

        let registry = Arc::new(EndpointRegistry::new(config.endpoints.clone()));
        let gateway = Arc::new(GatewayClient::new(registry));

        let encryption_key = if config.encrypt_downloads {
            Some(EncryptionKeyHandle::load_or_create()?)
        } else {
            None
        };

        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut manager = DownloadManager::new(
            Arc::clone(&gateway),
            store.clone(),
            vault,
            events.clone(),
        )
        .with_max_concurrent(config.max_concurrent_downloads);
        if let Some(key) = &encryption_key {
            manager = manager.with_encryption(key.clone());
        }

        info!(
            endpoints = config.endpoints.len(),
            encrypted = config.encrypt_downloads,
            "content service ready"
        );

        Ok((
            Self {
                cache,
                metadata: Arc::clone(&gateway) as Arc<dyn MetadataGateway>,
                gateway,
                manager,
                store,
                encryption_key,
                events,
                server: Mutex::new(None),
            },
            receiver,
        ))
    }

    /// Replaces the metadata source (test seam; the download path keeps
    /// using the real gateway client).
    pub fn set_metadata_source(&mut self, source: Arc<dyn MetadataGateway>) {
        self.metadata = source;
    }

    /// Read-through metadata fetch: cache hit when fresh, otherwise one
    /// gateway call with failover followed by a cache repopulate.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Gateway`] when all endpoints fail, or
    /// [`ServiceError::InvalidMetadata`] when the payload is not JSON.
    #[instrument(skip(self, request), fields(path = %request.path))]
    pub async fn fetch_metadata(
        &self,
        request: &GatewayRequest,
        tags: &[&str],
    ) -> Result<Value, ServiceError> {
        let fingerprint = request.fingerprint();

        if let Some(hit) = self.cache.get(&fingerprint).await? {
            debug!(fingerprint, "metadata cache hit");
            return Ok(hit);
        }

        let response = self.metadata.fetch(request).await?;
        let payload: Value = response.json().map_err(|e| ServiceError::InvalidMetadata {
            reason: e.to_string(),
        })?;

        self.cache.put(&fingerprint, &payload, tags).await?;
        Ok(payload)
    }

    /// Starts a download in the background. The outcome arrives on the
    /// event channel; immediate failures (lock contention, no disk space)
    /// surface there as `download-error` events too.
    pub fn initiate_download(&self, content_id: &str, quality: &str, source_url: &str) {
        let manager = self.manager.clone();
        let key = TaskKey::new(content_id, quality);
        let url = source_url.to_string();
        tokio::spawn(async move {
            // Errors are emitted as events and logged by the manager.
            let _ = manager.download(&key, &url).await;
        });
    }

    /// Downloads content and waits for the outcome. Exposed for callers
    /// that want the error inline rather than via the event channel.
    ///
    /// # Errors
    ///
    /// Returns the [`DownloadError`] for this run.
    pub async fn download_and_wait(
        &self,
        content_id: &str,
        quality: &str,
        source_url: &str,
    ) -> Result<(), ServiceError> {
        let key = TaskKey::new(content_id, quality);
        Ok(self.manager.download(&key, source_url).await?)
    }

    /// Signals a running download to stop. Returns true when one was
    /// active. The `.part` artifact is preserved for a later resume.
    pub fn cancel_download(&self, content_id: &str, quality: &str) -> bool {
        self.manager.cancel(&TaskKey::new(content_id, quality))
    }

    /// Bookkeeping record for a download, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the lookup fails.
    pub async fn query_status(
        &self,
        content_id: &str,
        quality: &str,
    ) -> Result<Option<DownloadTask>, ServiceError> {
        Ok(self.store.get(&TaskKey::new(content_id, quality)).await?)
    }

    /// All bookkeeping records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the query fails.
    pub async fn list_downloads(&self) -> Result<Vec<DownloadTask>, ServiceError> {
        Ok(self.store.list().await?)
    }

    /// Returns a local playback URL for downloaded content, starting the
    /// loopback streaming server on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotDownloaded`] when the content is not
    /// `Completed` in the vault, or [`ServiceError::Server`] when the
    /// server cannot start.
    #[instrument(skip(self))]
    pub async fn stream_offline(
        &self,
        content_id: &str,
        quality: &str,
    ) -> Result<StreamHandle, ServiceError> {
        let key = TaskKey::new(content_id, quality);
        let task = self.store.get(&key).await?;
        let playable = task.is_some_and(|task| {
            task.state() == DownloadState::Completed
                && PathBuf::from(&task.final_path).exists()
        });
        if !playable {
            return Err(ServiceError::NotDownloaded {
                content_id: content_id.to_string(),
                quality: quality.to_string(),
            });
        }

        let mut server = self.server.lock().await;
        if server.is_none() {
            let handle = StreamServer::new(self.store.clone(), self.encryption_key.clone())
                .start()
                .await?;
            let _ = self
                .events
                .send(DownloadEvent::ServerStarted {
                    port: handle.port(),
                })
                .await;
            *server = Some(handle);
        }

        let handle = server.as_ref().ok_or(ServiceError::NotDownloaded {
            content_id: content_id.to_string(),
            quality: quality.to_string(),
        })?;
        Ok(StreamHandle {
            url: handle.url_for(content_id, quality),
            port: handle.port(),
        })
    }

    /// Per-endpoint health counters for the diagnostics display.
    #[must_use]
    pub fn endpoint_health(&self) -> Vec<EndpointHealthSnapshot> {
        self.gateway.registry().health_snapshot()
    }

    /// Direct access to the metadata cache (explicit invalidation).
    #[must_use]
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Stops the streaming server when it is running.
    pub async fn stop_server(&self) {
        if let Some(handle) = self.server.lock().await.take() {
            handle.stop();
        }
    }
}
