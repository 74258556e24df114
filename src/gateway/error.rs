//! Error types for gateway operations.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Record of one failed endpoint attempt, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// Endpoint base URL that was attempted.
    pub endpoint: String,
    /// HTTP status code, when the endpoint responded at all.
    pub status: Option<u16>,
    /// Short description of the failure.
    pub reason: String,
    /// Wall time the attempt took.
    pub elapsed: Duration,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "{} -> HTTP {status} after {}ms",
                self.endpoint,
                self.elapsed.as_millis()
            ),
            None => write!(
                f,
                "{} -> {} after {}ms",
                self.endpoint,
                self.reason,
                self.elapsed.as_millis()
            ),
        }
    }
}

/// Errors that can occur talking to the gateway endpoints.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Every endpoint in the priority list failed.
    ///
    /// Carries one [`AttemptFailure`] per endpoint tried, in attempt order.
    #[error("all {} gateway endpoints failed: [{}]", .attempts.len(), format_attempts(.attempts))]
    AllEndpointsFailed {
        /// Per-endpoint failure records, in priority order.
        attempts: Vec<AttemptFailure>,
    },

    /// No endpoints are configured, so no request can be made.
    #[error("no gateway endpoints configured")]
    NoEndpoints,

    /// Network-level error for a direct content request (DNS, connection
    /// refused, TLS, mid-stream disconnect).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response for a direct content request.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

fn format_attempts(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// True when a direct content request may succeed if re-issued
    /// (timeouts, transport errors, 5xx responses).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { source, .. } => !is_tls_error(source),
            Self::HttpStatus { status, .. } => (500..600).contains(status) || *status == 408,
            Self::AllEndpointsFailed { .. } | Self::NoEndpoints | Self::InvalidUrl { .. } => false,
        }
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
