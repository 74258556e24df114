//! Failover HTTP client over a fixed, priority-ordered gateway endpoint list.
//!
//! Remote metadata and content live behind several interchangeable gateway
//! servers of varying reliability. This module provides:
//!
//! - [`EndpointRegistry`] - the immutable priority-ordered endpoint list with
//!   per-endpoint rolling health counters (diagnostics only, never reordering)
//! - [`GatewayClient`] - issues one logical request with per-endpoint failover
//!   and jittered exponential backoff between attempts
//! - [`GatewayError`] - aggregates every per-endpoint failure for diagnostics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamvault_core::gateway::{EndpointRegistry, GatewayClient, GatewayRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(EndpointRegistry::new(vec![
//!     url::Url::parse("https://g1.example.com")?,
//!     url::Url::parse("https://g2.example.com")?,
//! ]));
//! let client = GatewayClient::new(Arc::clone(&registry));
//! let request = GatewayRequest::new("/catalog/titles").with_query("page", "1");
//! let response = client.fetch_with_failover(&request).await?;
//! println!("status {}", response.status);
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod endpoint;
mod error;

pub use backoff::FailoverBackoff;
pub use client::{ContentProbe, GatewayClient, GatewayRequest, GatewayResponse, MetadataGateway};
pub use endpoint::{Endpoint, EndpointHealthSnapshot, EndpointRegistry};
pub use error::{AttemptFailure, GatewayError};
