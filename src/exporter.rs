#![forbid(unsafe_code)]

// Metrics exporter - pull-based Prometheus endpoint over a live snapshot

use crate::metrics::LoadMetrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn router(metrics: LoadMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

/// Serves until `shutdown` is cancelled.
pub async fn serve_on(
    listener: TcpListener,
    metrics: LoadMetrics,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Prometheus metrics server on http://{}/metrics", addr);
    }
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Binds `0.0.0.0:{port}` and serves until `shutdown` is cancelled.
pub async fn serve(port: u16, metrics: LoadMetrics, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    serve_on(listener, metrics, shutdown).await
}

/// Prometheus text exposition format, rendered fresh on every scrape
async fn metrics_handler(State(metrics): State<LoadMetrics>) -> impl IntoResponse {
    let body = metrics.snapshot().render_prometheus();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn health_handler(State(metrics): State<LoadMetrics>) -> Json<serde_json::Value> {
    let snapshot = metrics.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "elapsedSecs": snapshot.elapsed.as_secs_f64(),
        "connected": snapshot.connected,
        "disconnected": snapshot.disconnected,
    }))
}
