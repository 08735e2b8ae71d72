#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use dbtel_pipeline::health;
use dbtel_pipeline::pipeline::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;

fn breaker() -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        open_threshold: 1,
        error_ratio_threshold: 1.0,
        open_duration: Duration::from_secs(60),
        probe_successes: 1,
        window: Duration::from_secs(60),
    }))
}

#[tokio::test]
async fn healthz_returns_ok_with_no_targets_observed() {
    let port = common::get_available_port();
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    let handle = tokio::spawn(async move { health::serve(port, breaker(), Registry::new(), shutdown_signal.cancelled_owned()).await });

    assert!(common::wait_for_server(port, 50).await, "health server failed to start");

    let response = reqwest::get(format!("{}/healthz", common::get_test_url(port))).await.expect("request succeeds");
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn healthz_returns_503_when_every_breaker_is_open() {
    let port = common::get_available_port();
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    let breaker = breaker();
    breaker.observe("primary", false);

    let handle = tokio::spawn({
        let breaker = Arc::clone(&breaker);
        async move { health::serve(port, breaker, Registry::new(), shutdown_signal.cancelled_owned()).await }
    });

    assert!(common::wait_for_server(port, 50).await, "health server failed to start");

    let response = reqwest::get(format!("{}/healthz", common::get_test_url(port))).await.expect("request succeeds");
    assert_eq!(response.status(), 503);

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_exposition_format() {
    let port = common::get_available_port();
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    let registry = Registry::new();
    let breaker = breaker();
    breaker.register(&registry).expect("register breaker family");

    let handle = tokio::spawn({
        let registry = registry.clone();
        async move { health::serve(port, breaker, registry, shutdown_signal.cancelled_owned()).await }
    });

    assert!(common::wait_for_server(port, 50).await, "health server failed to start");

    let response = reqwest::get(format!("{}/metrics", common::get_test_url(port))).await.expect("request succeeds");
    assert_eq!(response.status(), 200);
    let content_type = response.headers().get("content-type").expect("content-type header present").to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    shutdown.cancel();
    let _ = handle.await;
}
