//! Integration tests for gateway failover behavior.
//!
//! These tests verify strict priority-order failover against mock endpoint
//! servers: first success wins, attempts never exceed the endpoint count,
//! and every failure is recorded for diagnostics.

use std::sync::Arc;
use std::time::Duration;

use streamvault_core::gateway::{
    EndpointRegistry, FailoverBackoff, GatewayClient, GatewayError, GatewayRequest,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Backoff with near-zero delays so failover tests run fast.
fn fast_backoff() -> FailoverBackoff {
    FailoverBackoff::new(Duration::from_millis(1), Duration::from_millis(2))
}

fn client_for(servers: &[&MockServer]) -> GatewayClient {
    let urls: Vec<Url> = servers
        .iter()
        .map(|s| Url::parse(&s.uri()).expect("mock server uri"))
        .collect();
    GatewayClient::new(Arc::new(EndpointRegistry::new(urls))).with_backoff(fast_backoff())
}

#[tokio::test]
async fn test_first_endpoint_success_stops_failover() {
    let g1 = MockServer::start().await;
    let g2 = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/catalog/titles"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items":[]}"#))
        .expect(1)
        .mount(&g1)
        .await;
    // Lower-priority endpoint must never be touched
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&g2)
        .await;

    let client = client_for(&[&g1, &g2]);
    let response = client
        .fetch_with_failover(&GatewayRequest::new("/catalog/titles"))
        .await
        .expect("first endpoint should serve the request");

    assert_eq!(response.status, 200);
    let payload: serde_json::Value = response.json().unwrap();
    assert_eq!(payload["items"], serde_json::json!([]));
}

#[tokio::test]
async fn test_failover_reaches_third_endpoint() {
    // Scenario: g1 and g2 fail, g3 succeeds -> success after 3 attempts,
    // recorded success endpoint = g3.
    let g1 = MockServer::start().await;
    let g2 = MockServer::start().await;
    let g3 = MockServer::start().await;

    for failing in [&g1, &g2] {
        Mock::given(method("GET"))
            .and(path("/catalog/titles"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(failing)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/catalog/titles"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .expect(1)
        .mount(&g3)
        .await;

    let client = client_for(&[&g1, &g2, &g3]);
    let response = client
        .fetch_with_failover(&GatewayRequest::new("/catalog/titles"))
        .await
        .expect("third endpoint should serve the request");
    assert_eq!(response.status, 200);

    // Health reflects the attempt outcomes without reordering
    let health = client.registry().health_snapshot();
    assert_eq!(health[0].failure_count, 1);
    assert_eq!(health[0].success_count, 0);
    assert_eq!(health[1].failure_count, 1);
    assert_eq!(health[2].success_count, 1);
    assert_eq!(health[2].failure_count, 0);
    // Priority ranks are untouched
    let ranks: Vec<usize> = health.iter().map(|h| h.rank).collect();
    assert_eq!(ranks, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_all_endpoints_failing_aggregates_attempts_in_priority_order() {
    let g1 = MockServer::start().await;
    let g2 = MockServer::start().await;
    let g3 = MockServer::start().await;

    for (server, status) in [(&g1, 500), (&g2, 502), (&g3, 404)] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(server)
            .await;
    }

    let client = client_for(&[&g1, &g2, &g3]);
    let error = client
        .fetch_with_failover(&GatewayRequest::new("/catalog/titles"))
        .await
        .expect_err("every endpoint fails");

    match error {
        GatewayError::AllEndpointsFailed { attempts } => {
            // Never more attempts than endpoints, in strict priority order
            assert_eq!(attempts.len(), 3);
            assert!(attempts[0].endpoint.starts_with(&g1.uri()));
            assert!(attempts[1].endpoint.starts_with(&g2.uri()));
            assert!(attempts[2].endpoint.starts_with(&g3.uri()));
            assert_eq!(attempts[0].status, Some(500));
            assert_eq!(attempts[1].status, Some(502));
            assert_eq!(attempts[2].status, Some(404));
        }
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_attempt_count_never_exceeds_endpoint_count() {
    let g1 = MockServer::start().await;

    // One endpoint, always failing: exactly one attempt, no retry loop
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&g1)
        .await;

    let client = client_for(&[&g1]);
    let error = client
        .fetch_with_failover(&GatewayRequest::new("/catalog/titles"))
        .await
        .expect_err("single failing endpoint");

    match error {
        GatewayError::AllEndpointsFailed { attempts } => assert_eq!(attempts.len(), 1),
        other => panic!("expected AllEndpointsFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_parameters_are_forwarded() {
    let g1 = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/catalog/titles"))
        .and(wiremock::matchers::query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&g1)
        .await;

    let client = client_for(&[&g1]);
    let response = client
        .fetch_with_failover(&GatewayRequest::new("/catalog/titles").with_query("page", "2"))
        .await
        .expect("query should match");
    assert_eq!(response.status, 200);
}
