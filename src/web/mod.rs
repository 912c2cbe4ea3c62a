//! # Control & Observability Surface
//!
//! A small axum router over [`OrchestrationManager`]:
//!
//! | method | path                          | effect                               |
//! |--------|-------------------------------|--------------------------------------|
//! | GET    | `/health`                     | tri-state health, 503 when unhealthy |
//! | GET    | `/stats`                      | per-queue counts and worker counters |
//! | GET    | `/jobs/active`                | active jobs across queues            |
//! | GET    | `/jobs/failed`                | failed jobs across queues            |
//! | POST   | `/jobs/retry`                 | retry every failed job               |
//! | POST   | `/jobs/clean`                 | remove finished jobs older than `days` |
//! | POST   | `/queues/{pause,resume,drain}` | apply to all five queues            |

pub mod errors;
pub mod handlers;
pub mod state;

pub use errors::{ApiError, ApiResult};
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::orchestration::OrchestrationManager;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/stats", get(handlers::health::stats))
        .route("/jobs/active", get(handlers::jobs::active_jobs))
        .route("/jobs/failed", get(handlers::jobs::failed_jobs))
        .route("/jobs/retry", post(handlers::jobs::retry_failed))
        .route("/jobs/clean", post(handlers::jobs::clean))
        .route("/queues/{action}", post(handlers::queues::control))
        .with_state(state)
}

/// Serve the control surface on `bind_address` until `shutdown` resolves
pub async fn serve<F>(
    manager: Arc<OrchestrationManager>,
    bind_address: &str,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!(address = %listener.local_addr()?, "🌐 Control surface listening");
    axum::serve(listener, create_router(AppState::new(manager)))
        .with_graceful_shutdown(shutdown)
        .await
}
