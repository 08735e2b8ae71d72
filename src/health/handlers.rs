use crate::pipeline::circuit_breaker::{BreakerState, CircuitBreaker};
use axum::Extension;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, instrument};

#[derive(Serialize, Debug)]
struct TargetHealth {
    target: String,
    state: &'static str,
}

#[derive(Serialize, Debug)]
struct Health {
    name: &'static str,
    version: &'static str,
    targets: Vec<TargetHealth>,
}

/// Liveness/readiness probe: 200 unless every configured target's breaker
/// is open, in which case the process is accepting work but producing
/// nothing, and a 503 lets an orchestrator notice.
#[instrument(skip(breaker), fields(http.route = "/healthz"))]
pub async fn healthz(Extension(breaker): Extension<Arc<CircuitBreaker>>) -> impl IntoResponse {
    let states = breaker.states();
    let all_open = !states.is_empty() && states.iter().all(|(_, s)| *s == BreakerState::Open);

    let health = Health {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        targets: states.into_iter().map(|(target, state)| TargetHealth { target, state: state.as_gauge_label() }).collect(),
    };

    let status = if all_open { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status, Json(health))
}

/// This process's own self-telemetry (spec §4.14/§4.16 counters, breaker
/// gauges, cost-control gauge), in Prometheus exposition format.
#[instrument(skip(registry), fields(http.route = "/metrics"))]
pub async fn metrics(Extension(registry): Extension<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = registry.gather();
    let mut buffer = Vec::new();
    let mut headers = HeaderMap::new();

    if let Err(err) = encoder.encode(&families, &mut buffer) {
        error!(error = %err, "failed to encode self-telemetry");
        headers.insert("content-type", HeaderValue::from_static("text/plain; charset=utf-8"));
        return (StatusCode::INTERNAL_SERVER_ERROR, headers, Vec::new());
    }

    let content_type = HeaderValue::from_str(encoder.format_type()).unwrap_or_else(|_| HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert("content-type", content_type);
    (StatusCode::OK, headers, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::circuit_breaker::CircuitBreakerConfig;
    use std::time::Duration;

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
    async fn healthz_ok_with_no_targets() {
        let response = healthz(Extension(breaker())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_unavailable_when_every_target_open() {
        let breaker = breaker();
        breaker.observe("db-1", false);
        assert!(breaker.is_open("db-1"));

        let response = healthz(Extension(breaker)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_exposes_registered_families() {
        let registry = Registry::new();
        let breaker = breaker();
        breaker.register(&registry).expect("register breaker gauge");
        breaker.observe("db-1", true);

        let response = metrics(Extension(registry)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
