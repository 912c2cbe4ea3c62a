use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::orchestration::BulkOutcome;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

/// POST /queues/{pause|resume|drain}, applied to every queue
pub async fn control(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> ApiResult<Json<BulkOutcome>> {
    let manager = &state.manager;
    let outcome = match action.as_str() {
        "pause" => manager.pause_all().await,
        "resume" => manager.resume_all().await,
        "drain" => manager.drain_all().await,
        other => return Err(ApiError::not_found(format!("queue action '{other}'"))),
    };
    info!(action = %action, failed = outcome.failed.len(), "🎛️ Queue control applied");
    Ok(Json(outcome))
}
