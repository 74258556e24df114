//! Gateway HTTP client with priority-order failover.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

use super::backoff::FailoverBackoff;
use super::endpoint::EndpointRegistry;
use super::error::{AttemptFailure, GatewayError};
use crate::crypto::hex_encode;

/// HTTP connect timeout for all gateway traffic (10 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt timeout for metadata requests (15 seconds).
///
/// Content requests (large streamed bodies) deliberately carry no total
/// timeout; mid-stream stalls surface as stream errors in the copy loop.
const METADATA_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

/// One logical metadata request, independent of which endpoint serves it.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Path relative to the endpoint base URL (e.g. `/catalog/titles`).
    pub path: String,
    /// Query parameters in the order they were added.
    pub query: Vec<(String, String)>,
}

impl GatewayRequest {
    /// Creates a request for the given path with no query parameters.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Adds one query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Stable cache key derived from the request parameters.
    ///
    /// Query pairs are sorted before hashing so parameter order does not
    /// change the fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut sorted = self.query.clone();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.path.as_bytes());
        for (key, value) in &sorted {
            hasher.update([0x1f]);
            hasher.update(key.as_bytes());
            hasher.update([0x1e]);
            hasher.update(value.as_bytes());
        }
        hex_encode(&hasher.finalize())
    }
}

/// Response from a successful gateway metadata request.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code (always a success code).
    pub status: u16,
    /// Raw response body.
    pub body: Bytes,
}

impl GatewayResponse {
    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the body is not valid
    /// JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Result of a HEAD probe against a content URL.
#[derive(Debug, Clone, Copy)]
pub struct ContentProbe {
    /// `Content-Length` when the server reports one.
    pub content_length: Option<u64>,
    /// Whether the server advertises `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
}

/// Seam for metadata retrieval, so orchestration can be tested against a
/// stub without a live endpoint list.
#[async_trait]
pub trait MetadataGateway: Send + Sync {
    /// Issues one logical metadata request with failover.
    async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError>;
}

/// Gateway client: one logical request, tried against the endpoint list
/// strictly in priority order with backoff between attempts.
///
/// The client is cheap to clone-by-Arc and shares only the immutable
/// registry and its atomic health counters between concurrent calls; each
/// call owns its in-flight request state.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    registry: Arc<EndpointRegistry>,
    backoff: FailoverBackoff,
}

impl GatewayClient {
    /// Creates a client over the given endpoint registry.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            http,
            registry,
            backoff: FailoverBackoff::default(),
        }
    }

    /// Replaces the default backoff schedule (used by tests to avoid real
    /// sleeps).
    #[must_use]
    pub fn with_backoff(mut self, backoff: FailoverBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The endpoint registry this client records health into.
    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Issues a metadata request against the endpoint list.
    ///
    /// Endpoints are attempted strictly in priority order, at most once
    /// each, with jittered exponential backoff between attempts. The first
    /// success wins. Every attempt updates the endpoint's health counters;
    /// recording never reorders the list.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NoEndpoints`] for an empty registry, or
    /// [`GatewayError::AllEndpointsFailed`] aggregating one
    /// [`AttemptFailure`] per endpoint when every attempt fails.
    #[instrument(skip(self, request), fields(path = %request.path))]
    pub async fn fetch_with_failover(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        if self.registry.is_empty() {
            return Err(GatewayError::NoEndpoints);
        }

        let mut attempts: Vec<AttemptFailure> = Vec::with_capacity(self.registry.len());

        for (endpoint, health) in self.registry.iter() {
            let attempt_number = u32::try_from(attempts.len() + 1).unwrap_or(u32::MAX);
            if !attempts.is_empty() {
                let delay = self.backoff.delay_after(attempt_number - 1);
                debug!(
                    endpoint = %endpoint.url,
                    attempt = attempt_number,
                    delay_ms = delay.as_millis(),
                    "backing off before next endpoint"
                );
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            match self.attempt(&endpoint.url, request).await {
                Ok(response) => {
                    let elapsed = started.elapsed();
                    health.record_success(elapsed);
                    debug!(
                        endpoint = %endpoint.url,
                        attempt = attempt_number,
                        elapsed_ms = elapsed.as_millis(),
                        "gateway attempt succeeded"
                    );
                    return Ok(response);
                }
                Err((status, reason)) => {
                    let elapsed = started.elapsed();
                    health.record_failure(elapsed);
                    warn!(
                        endpoint = %endpoint.url,
                        attempt = attempt_number,
                        status = ?status,
                        reason = %reason,
                        elapsed_ms = elapsed.as_millis(),
                        "gateway attempt failed"
                    );
                    attempts.push(AttemptFailure {
                        endpoint: endpoint.url.to_string(),
                        status,
                        reason,
                        elapsed,
                    });
                }
            }
        }

        Err(GatewayError::AllEndpointsFailed { attempts })
    }

    /// One attempt against one endpoint. Returns `(status, reason)` on
    /// failure so the caller can build the attempt record.
    async fn attempt(
        &self,
        base: &Url,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, (Option<u16>, String)> {
        let url = base
            .join(&request.path)
            .map_err(|e| (None, format!("invalid request path: {e}")))?;

        let response = self
            .http
            .get(url)
            .query(&request.query)
            .timeout(METADATA_ATTEMPT_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    (None, "timeout".to_string())
                } else {
                    (None, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err((Some(status.as_u16()), "error status".to_string()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| (Some(status.as_u16()), format!("body read failed: {e}")))?;

        Ok(GatewayResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// HEAD probe for a content URL: expected size and range support.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on network failure or error status.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe_content(&self, url: &Url) -> Result<ContentProbe, GatewayError> {
        let response = self
            .http
            .head(url.clone())
            .timeout(METADATA_ATTEMPT_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_transport_error(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::http_status(url.as_str(), status.as_u16()));
        }

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let accept_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        Ok(ContentProbe {
            content_length,
            accept_ranges,
        })
    }

    /// Streaming GET for a content URL, optionally with a `Range` header.
    ///
    /// Accepts 200 and 206 responses; everything else is an error. The
    /// response is returned unread so the caller can stream the body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on network failure or error status.
    #[instrument(skip(self), fields(url = %url, range = ?range))]
    pub async fn fetch_content(
        &self,
        url: &Url,
        range: Option<&str>,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self.http.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(url.as_str(), e))?;

        let status = response.status();
        if !(status.is_success() || status.as_u16() == 206) {
            return Err(GatewayError::http_status(url.as_str(), status.as_u16()));
        }

        Ok(response)
    }
}

#[async_trait]
impl MetadataGateway for GatewayClient {
    async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.fetch_with_failover(request).await
    }
}

fn map_transport_error(url: &str, error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::timeout(url)
    } else {
        GatewayError::network(url, error)
    }
}
