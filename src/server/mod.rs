//! Loopback byte-range streaming server for local playback.
//!
//! Serves finalized vault content to the embedded player over HTTP/1.1 GET
//! with `Range` support: 200 for full reads, 206 with `Content-Range` for
//! windows, 416 for unsatisfiable ranges, 404 for unknown content, 500 for
//! internal failures. Binds a loopback-only address with an OS-assigned
//! ephemeral port.
//!
//! Only `Completed` tasks are resolvable; in-flight `.part` artifacts are
//! invisible here because lookups go through the task store's `final_path`,
//! which only exists after the atomic rename.
//!
//! Encrypted content is decrypted per request, for exactly the requested
//! byte window: the cipher is seekable, so decryption is a pure function of
//! `(key handle, content identity, offset)` with no state shared between
//! connections.

mod range;

pub use range::{RangeOutcome, resolve_range};

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{error, info, instrument, warn};

use crate::crypto::{ContentCipher, EncryptionKeyHandle};
use crate::download::{DownloadState, TaskKey, TaskStore};

/// Errors starting the streaming server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the loopback listener failed.
    #[error("failed to bind local streaming server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared state for request handlers.
#[derive(Debug, Clone)]
struct ServerState {
    store: TaskStore,
    encryption_key: Option<EncryptionKeyHandle>,
}

/// The local streaming server, ready to be started.
#[derive(Debug)]
pub struct StreamServer {
    state: ServerState,
}

/// Handle to a running streaming server.
#[derive(Debug)]
pub struct StreamServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StreamServer {
    /// Creates a server over the given task store. `encryption_key` must be
    /// provided when the vault holds encrypted content.
    #[must_use]
    pub fn new(store: TaskStore, encryption_key: Option<EncryptionKeyHandle>) -> Self {
        Self {
            state: ServerState {
                store,
                encryption_key,
            },
        }
    }

    /// Binds `127.0.0.1` on an OS-assigned ephemeral port and starts
    /// serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be bound.
    pub async fn start(self) -> Result<StreamServerHandle, ServerError> {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;

        let app = Router::new()
            .route("/content/:content_id/:quality", get(serve_content))
            .with_state(self.state);

        let task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app).await {
                error!(%error, "local streaming server terminated");
            }
        });

        info!(port = local_addr.port(), "local streaming server listening");
        Ok(StreamServerHandle { local_addr, task })
    }
}

impl StreamServerHandle {
    /// The ephemeral port the server bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Playback URL for a piece of content on this server.
    #[must_use]
    pub fn url_for(&self, content_id: &str, quality: &str) -> String {
        format!(
            "http://{}/content/{content_id}/{quality}",
            self.local_addr
        )
    }

    /// Stops the server task.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// GET /content/{content_id}/{quality}
///
/// Every connection is handled independently; the per-request cipher state
/// is derived from the byte offset alone.
#[instrument(skip(state, headers))]
async fn serve_content(
    State(state): State<ServerState>,
    UrlPath((content_id, quality)): UrlPath<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let key = TaskKey::new(content_id, quality);

    let task = match state.store.get(&key).await {
        Ok(Some(task)) => task,
        Ok(None) => return not_found(),
        Err(error) => {
            error!(%error, "task lookup failed");
            return internal_error();
        }
    };

    // Visibility is gated by the atomic rename: anything not Completed has
    // no published file and is indistinguishable from unknown content.
    if task.state() != DownloadState::Completed {
        return not_found();
    }

    let path = Path::new(&task.final_path).to_path_buf();
    let size = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            warn!(%error, path = %path.display(), "completed task has no file");
            return not_found();
        }
    };

    let cipher = if task.encrypted {
        match &state.encryption_key {
            Some(handle) => Some(ContentCipher::new(handle, &key.content_id, &key.quality)),
            None => {
                error!("encrypted content requested but no key handle configured");
                return internal_error();
            }
        }
    } else {
        None
    };

    let range_header = headers.get(RANGE).and_then(|v| v.to_str().ok());
    match resolve_range(range_header, size) {
        RangeOutcome::Unsatisfiable => range_not_satisfiable(size),
        RangeOutcome::Full => stream_window(&path, 0, size, size, None, cipher).await,
        RangeOutcome::Window { start, end } => {
            stream_window(&path, start, end - start + 1, size, Some((start, end)), cipher).await
        }
    }
}

/// Streams `length` bytes of the file starting at `start`, decrypting on
/// the fly when a cipher is present. `window` selects 206 vs 200.
async fn stream_window(
    path: &Path,
    start: u64,
    length: u64,
    size: u64,
    window: Option<(u64, u64)>,
    cipher: Option<ContentCipher>,
) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(error) => {
            error!(%error, path = %path.display(), "failed to open content file");
            return internal_error();
        }
    };

    if start > 0
        && let Err(error) = file.seek(std::io::SeekFrom::Start(start)).await
    {
        error!(%error, "failed to seek content file");
        return internal_error();
    }

    let reader = ReaderStream::new(file.take(length));
    let body = match cipher {
        Some(cipher) => {
            // Decrypt exactly the requested window: the cipher seeks to each
            // chunk's absolute file offset, starting at the window start.
            let mut offset = start;
            let decrypted = reader.map(move |chunk| {
                chunk.map(|bytes| {
                    let mut buf = bytes.to_vec();
                    cipher.decrypt_at(offset, &mut buf);
                    offset += buf.len() as u64;
                    Bytes::from(buf)
                })
            });
            Body::from_stream(decrypted)
        }
        None => Body::from_stream(reader),
    };

    let builder = match window {
        Some((window_start, window_end)) => Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                CONTENT_RANGE,
                format!("bytes {window_start}-{window_end}/{size}"),
            ),
        None => Response::builder().status(StatusCode::OK),
    };

    builder
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, length.to_string())
        .header(ACCEPT_RANGES, "bytes")
        .body(body)
        .unwrap_or_else(|_| internal_error())
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn internal_error() -> Response {
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn range_not_satisfiable(size: u64) -> Response {
    Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(CONTENT_RANGE, format!("bytes */{size}"))
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response())
}
