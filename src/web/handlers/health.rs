use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::debug;

use crate::orchestration::{EngineStats, HealthReport, HealthStatus};
use crate::web::state::AppState;

/// Engine health: GET /health
///
/// Answers 503 only when the engine is unhealthy; a degraded engine still
/// serves traffic and reports 200 with the failing checks.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.manager.health_check().await;
    debug!(status = %report.status, "health check served");
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

/// Per-queue counts and worker counters: GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.manager.stats().await)
}
