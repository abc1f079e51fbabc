//! Health and metrics endpoints.
//!
//! ```text
//! GET /health   → {"status":"healthy","service":"warehouse-batch","timestamp":"<RFC 3339>"}
//! GET /metrics  → Prometheus text exposition
//! ```

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "warehouse-batch";

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: &'static str,
    /// Service name
    pub service: &'static str,
    /// Response time, RFC 3339
    pub timestamp: String,
}

/// Liveness check. Does not probe the brokers.
#[allow(clippy::unused_async)]
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            service: SERVICE_NAME,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}

/// Renders the Prometheus registry.
#[allow(clippy::unused_async)]
pub async fn metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Builds the router.
pub fn router(metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(metrics_handle)
}

/// Serves `router` on `0.0.0.0:port` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(
    port: u16,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
