// HTTP server for the agent's own Prometheus metrics
//
// Serves /metrics and /health while a chaos run is in progress so the run
// itself can be scraped next to the services it is disturbing.

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;

/// Router with the metrics and health endpoints
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
}

/// Start the metrics HTTP server
///
/// # Arguments
/// * `port` - Port to listen on
pub async fn start_metrics_server(port: u16) -> Result<()> {
    if let Err(e) = metrics::init() {
        // Already registered in this process
        tracing::debug!("Metrics registry init skipped: {}", e);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind metrics server")?;

    axum::serve(listener, router())
        .await
        .context("Metrics server error")?;

    Ok(())
}

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

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        let _ = metrics::init();
        metrics::ELIGIBLE_TARGETS.set(2);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router()).await.unwrap();
        });

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("chaos_eligible_targets"));

        let health = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
    }
}
