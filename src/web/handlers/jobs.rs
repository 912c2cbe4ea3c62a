use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::system::{DEFAULT_LIST_LIMIT, MAX_CLEAN_DAYS};
use crate::models::{Job, JobId};
use crate::orchestration::{BulkOutcome, RetryReport};
use crate::state_machine::JobState;
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> ApiResult<i64> {
        match self.limit {
            None => Ok(DEFAULT_LIST_LIMIT),
            Some(limit) if limit > 0 => Ok(limit),
            Some(limit) => Err(ApiError::bad_request(format!(
                "limit must be positive, got {limit}"
            ))),
        }
    }
}

/// What a monitor needs to know about one job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub queue: String,
    pub state: JobState,
    pub priority: i32,
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            queue: job.queue_name,
            state: job.state,
            priority: job.priority,
            progress: job.progress,
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
            failed_reason: job.failed_reason,
            created_at: job.created_at,
            processed_at: job.processed_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<JobSummary>,
}

impl From<Vec<Job>> for JobListResponse {
    fn from(jobs: Vec<Job>) -> Self {
        Self {
            count: jobs.len(),
            jobs: jobs.into_iter().map(JobSummary::from).collect(),
        }
    }
}

/// GET /jobs/active
pub async fn active_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JobListResponse>> {
    let jobs = state.manager.active_jobs(params.limit()?).await?;
    Ok(Json(jobs.into()))
}

/// GET /jobs/failed
pub async fn failed_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<JobListResponse>> {
    let jobs = state.manager.failed_jobs(params.limit()?).await?;
    Ok(Json(jobs.into()))
}

/// POST /jobs/retry
pub async fn retry_failed(State(state): State<AppState>) -> Json<RetryReport> {
    Json(state.manager.retry_all_failed().await)
}

#[derive(Debug, Deserialize)]
pub struct CleanRequest {
    pub days: u32,
}

/// POST /jobs/clean `{"days": N}`, `N <= MAX_CLEAN_DAYS`
pub async fn clean(
    State(state): State<AppState>,
    Json(request): Json<CleanRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    if request.days > MAX_CLEAN_DAYS {
        return Err(ApiError::bad_request(format!(
            "days must be at most {MAX_CLEAN_DAYS}, got {}",
            request.days
        )));
    }
    Ok(Json(state.manager.clean_older_than(request.days).await))
}
