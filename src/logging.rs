//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging concurrent workers and
//! long-running workflow jobs.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` wins when set; otherwise the level follows `CONVEYOR_ENV`.
/// `CONVEYOR_LOG_FORMAT=json` switches the console layer to JSON lines.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("CONVEYOR_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be installed by an embedding process
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("tracing subscriber already installed, keeping it");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// `CONVEYOR_ENV`, then `APP_ENV`, else `development`
pub fn get_environment() -> String {
    std::env::var("CONVEYOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    if environment == "production" {
        "info"
    } else {
        "debug"
    }
}

/// Log structured data for job lifecycle transitions
pub fn log_job_operation(
    operation: &str,
    queue: &str,
    job_id: &str,
    attempts_made: u32,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        queue = %queue,
        job_id = %job_id,
        attempts_made = attempts_made,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for queue administration
pub fn log_queue_operation(operation: &str, queue: &str, affected: Option<u64>) {
    tracing::info!(
        operation = %operation,
        queue = %queue,
        affected = affected,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 QUEUE_OPERATION"
    );
}

/// Log structured data for workflow step execution
pub fn log_workflow_step(
    operation: &str,
    workflow_id: &str,
    step_id: &str,
    step_type: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        workflow_id = %workflow_id,
        step_id = %step_id,
        step_type = %step_type,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔀 WORKFLOW_STEP"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
