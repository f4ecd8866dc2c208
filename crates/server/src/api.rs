//! HTTP API for scheduler status, health checks, and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use churn_lib::{LabelStore, RetrainingScheduler};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
pub struct AppState {
    pub scheduler: Arc<RetrainingScheduler>,
    pub store: Arc<dyn LabelStore>,
}

impl AppState {
    pub fn new(scheduler: Arc<RetrainingScheduler>, store: Arc<dyn LabelStore>) -> Self {
        Self { scheduler, store }
    }
}

/// Scheduler status plus labeled-data statistics
async fn scheduler_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scheduler = state.scheduler.status().await;

    let labeled_data_stats = match state.store.labeled_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "Failed to read labeled data statistics");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            );
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "scheduler": scheduler,
            "labeled_data_stats": labeled_data_stats,
        })),
    )
}

/// Scheduler health - returns 200 when enabled and running, 503 otherwise
async fn scheduler_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.scheduler.status().await;
    let healthy = status.enabled && status.running;

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "healthy": healthy,
            "enabled": status.enabled,
            "running": status.running,
        })),
    )
}

/// Archived model versions, newest first, with headline metrics
async fn model_versions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.scheduler.version_manager().get_version_summary() {
        Ok(versions) => (
            StatusCode::OK,
            Json(json!({ "success": true, "versions": versions })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to list model versions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": e.to_string() })),
            )
        }
    }
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/health", get(scheduler_health))
        .route("/api/models/versions", get(model_versions))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
