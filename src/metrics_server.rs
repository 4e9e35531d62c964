// HTTP server for Prometheus metrics and limiter status
//
// Routes:
// - /metrics  Prometheus text exposition
// - /health   liveness
// - /status   dashboard JSON for every resource

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;
use crate::rate_limit::{DashboardBuilder, RateLimiter};

/// Build the router without binding a socket
pub fn router(limiter: RateLimiter) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(limiter)
}

/// Start the metrics HTTP server and run until `shutdown` resolves
///
/// # Arguments
/// * `port` - Port to listen on (default 9090)
/// * `limiter` - Limiter reported on by `/status`
/// * `shutdown` - Graceful shutdown signal
pub async fn start_metrics_server<F>(port: u16, limiter: RateLimiter, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::init().context("Failed to initialize metrics")?;

    let app = router(limiter);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting metrics server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind metrics server")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Metrics server error")?;

    Ok(())
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler(State(limiter): State<RateLimiter>) -> StatusCode {
    if limiter.is_shut_down() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// Dashboard endpoint
async fn status_handler(State(limiter): State<RateLimiter>) -> impl IntoResponse {
    Json(DashboardBuilder::new(limiter).build())
}
