//! HTTP API for health checks, Prometheus metrics and experiment statistics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use testbed_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::TestbedMetrics,
    tracker::{Series, SeriesReport, StatsGatherer},
    ExperimentId,
};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: TestbedMetrics,
    pub stats: Arc<StatsGatherer>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: TestbedMetrics,
        stats: Arc<StatsGatherer>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            stats,
        }
    }
}

/// 200 while operational (degraded included), 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 200 while an experiment is running, 503 otherwise
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

#[derive(Debug, Serialize)]
pub struct StatsEntry {
    pub experiment_id: ExperimentId,
    #[serde(flatten)]
    pub series: Series,
    pub name: String,
    pub report: SeriesReport,
}

/// Statistics gathered so far, one entry per experiment and series
async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entries: Vec<StatsEntry> = state
        .stats
        .reports()
        .into_iter()
        .map(|(experiment_id, series, report)| StatsEntry {
            experiment_id,
            name: series.to_string(),
            series,
            report,
        })
        .collect();
    Json(entries)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
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
