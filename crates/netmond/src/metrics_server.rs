//! HTTP endpoint for Prometheus scraping and health probes.

use crate::health_monitor::HealthMonitor;
use crate::metrics::MetricsCollector;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Clone)]
struct MetricsServerState {
    collector: MetricsCollector,
    health: Arc<HealthMonitor>,
}

/// Builds the `/metrics` + `/health` router.
pub fn router(collector: MetricsCollector, health: Arc<HealthMonitor>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(MetricsServerState { collector, health })
}

/// Serves the endpoints on `addr` until `shutdown` is cancelled.
pub async fn start_metrics_server(
    collector: MetricsCollector,
    health: Arc<HealthMonitor>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(collector, health))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn metrics_handler(State(state): State<MetricsServerState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.collector.registry.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<MetricsServerState>) -> impl IntoResponse {
    let status = state.health.status();
    let body = serde_json::json!({
        "status": status.as_str(),
        "storage_failure_rate": state.health.failure_rate(),
        "secs_since_last_cycle": state.health.time_since_last_cycle().as_secs(),
    });
    let code = match status {
        crate::metrics::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, axum::Json(body))
}
