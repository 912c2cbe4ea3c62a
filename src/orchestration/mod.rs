//! # Orchestration
//!
//! [`OrchestrationManager`] owns one [`Queue`](crate::queue::Queue) and one
//! [`Worker`](crate::execution::Worker) per job kind, built from a single
//! configuration and shared store. It is the only entry point the control
//! surface talks to: health, statistics, bulk pause/resume/drain, cleaning
//! and bulk retry.

pub mod health;
pub mod manager;

pub use health::{HealthChecks, HealthReport, HealthStatus};
pub use manager::{
    BulkOutcome, Collaborators, EngineStats, OrchestrationManager, QueueStats, RetryReport,
};
