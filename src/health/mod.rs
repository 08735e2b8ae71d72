//! Health-check HTTP endpoints.
//!
//! Spec §1 names these as an external collaborator to the core pipeline
//! ("only their interfaces specified in §6"); this module is that
//! collaborator, laid out as a thin `Router` wiring plus a `handlers`
//! submodule, the way an axum server serving a couple of probe routes
//! alongside its `ServiceBuilder` middleware stack usually is.

mod handlers;

use crate::pipeline::circuit_breaker::CircuitBreaker;
use anyhow::Result;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::{Extension, Router};
use prometheus::Registry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::PropagateRequestIdLayer;
use tower_http::set_header::SetRequestHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use ulid::Ulid;

/// Serve `/healthz` (breaker state per target) and `/metrics` (this
/// process's own prometheus exposition) until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener cannot be bound.
pub async fn serve(
    port: u16,
    breaker: Arc<CircuitBreaker>,
    registry: Registry,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static("x-request-id")))
                .layer(TraceLayer::new_for_http())
                .layer(Extension(breaker))
                .layer(Extension(registry)),
        );

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(port, "health endpoint listening");

    axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
