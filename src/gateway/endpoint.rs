//! Endpoint registry: immutable priority order plus rolling health counters.
//!
//! The priority vector is fixed at construction and never mutated by the
//! failover algorithm. Health counters are updated with short atomic
//! increments and feed the diagnostics display only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use url::Url;

/// A single gateway endpoint with its fixed priority rank.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Base URL of the gateway server.
    pub url: Url,
    /// Position in the priority order (0 = tried first).
    pub rank: usize,
}

/// Rolling health counters for one endpoint.
///
/// All fields are atomics so concurrent `fetch_with_failover` calls can
/// record outcomes without locking. Latency is tracked as a running total
/// plus sample count; the average is computed on snapshot.
#[derive(Debug, Default)]
pub(crate) struct EndpointHealth {
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latency_total_micros: AtomicU64,
    latency_samples: AtomicU64,
}

impl EndpointHealth {
    pub(crate) fn record_success(&self, elapsed: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    pub(crate) fn record_failure(&self, elapsed: Duration) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.record_latency(elapsed);
    }

    fn record_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_total_micros.fetch_add(micros, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64, Duration) {
        let successes = self.success_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let avg = if samples == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.latency_total_micros.load(Ordering::Relaxed) / samples)
        };
        (successes, failures, avg)
    }
}

/// Point-in-time health view of one endpoint, for diagnostics display.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EndpointHealthSnapshot {
    /// Endpoint base URL.
    pub url: String,
    /// Priority rank (0 = tried first).
    pub rank: usize,
    /// Successful attempts recorded.
    pub success_count: u64,
    /// Failed attempts recorded.
    pub failure_count: u64,
    /// Average attempt latency across all recorded attempts.
    pub avg_latency: Duration,
}

/// The immutable, priority-ordered endpoint list.
///
/// Constructed once and shared (`Arc`) between all in-flight gateway calls.
/// Recording health never changes the iteration order.
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    health: Vec<EndpointHealth>,
}

impl EndpointRegistry {
    /// Builds a registry from base URLs; list position defines priority.
    #[must_use]
    pub fn new(urls: Vec<Url>) -> Self {
        let endpoints = urls
            .into_iter()
            .enumerate()
            .map(|(rank, url)| Endpoint { url, rank })
            .collect::<Vec<_>>();
        let health = endpoints.iter().map(|_| EndpointHealth::default()).collect();
        Self { endpoints, health }
    }

    /// Number of configured endpoints (also the attempt cap for one call).
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true when no endpoints are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Iterates endpoints strictly in priority order, paired with their
    /// health counters.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Endpoint, &EndpointHealth)> {
        self.endpoints.iter().zip(self.health.iter())
    }

    /// Current health counters for every endpoint, in priority order.
    #[must_use]
    pub fn health_snapshot(&self) -> Vec<EndpointHealthSnapshot> {
        self.endpoints
            .iter()
            .zip(self.health.iter())
            .map(|(endpoint, health)| {
                let (success_count, failure_count, avg_latency) = health.snapshot();
                EndpointHealthSnapshot {
                    url: endpoint.url.to_string(),
                    rank: endpoint.rank,
                    success_count,
                    failure_count,
                    avg_latency,
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry_of(urls: &[&str]) -> EndpointRegistry {
        EndpointRegistry::new(urls.iter().map(|u| Url::parse(u).unwrap()).collect())
    }

    #[test]
    fn test_registry_assigns_ranks_in_order() {
        let registry = registry_of(&["https://g1.example.com", "https://g2.example.com"]);
        let ranks: Vec<usize> = registry.iter().map(|(e, _)| e.rank).collect();
        assert_eq!(ranks, vec![0, 1]);
    }

    #[test]
    fn test_recording_health_does_not_reorder() {
        let registry = registry_of(&[
            "https://g1.example.com",
            "https://g2.example.com",
            "https://g3.example.com",
        ]);

        // Hammer the first endpoint with failures
        for (endpoint, health) in registry.iter() {
            if endpoint.rank == 0 {
                for _ in 0..50 {
                    health.record_failure(Duration::from_millis(10));
                }
            }
        }

        let order: Vec<String> = registry.iter().map(|(e, _)| e.url.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "https://g1.example.com/",
                "https://g2.example.com/",
                "https://g3.example.com/"
            ]
        );
    }

    #[test]
    fn test_health_snapshot_average_latency() {
        let registry = registry_of(&["https://g1.example.com"]);
        let (_, health) = registry.iter().next().unwrap();
        health.record_success(Duration::from_millis(100));
        health.record_failure(Duration::from_millis(300));

        let snapshot = registry.health_snapshot();
        assert_eq!(snapshot[0].success_count, 1);
        assert_eq!(snapshot[0].failure_count, 1);
        assert_eq!(snapshot[0].avg_latency, Duration::from_millis(200));
    }

    #[test]
    fn test_empty_registry() {
        let registry = EndpointRegistry::new(Vec::new());
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.health_snapshot().is_empty());
    }
}
