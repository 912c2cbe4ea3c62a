#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conveyor Core
//!
//! Durable multi-queue job execution engine with an embedded workflow interpreter.
//!
//! ## Overview
//!
//! Business services enqueue typed jobs onto one of five fixed queues
//! (notification, delivery, document generation, media transformation, workflow).
//! Each queue has exactly one [`execution::Worker`] that claims jobs in priority
//! order, respects a concurrency bound and a start-rate limit, runs the matching
//! [`processors::JobProcessor`], and reflects the outcome back to the
//! [`store::JobStore`]: completed, rescheduled with backoff, or failed.
//!
//! ## Architecture
//!
//! ```text
//! producer ──▶ Queue ──▶ JobStore ◀── Worker ──▶ Processor
//!                                        │            │
//!                                        │            └─▶ WorkflowInterpreter
//!                                        ▼
//!                              OrchestrationManager ──▶ web control surface
//! ```
//!
//! ## Module Organization
//!
//! - [`models`] - Job records, payload variants and workflow step definitions
//! - [`state_machine`] - Job lifecycle states and legal transitions
//! - [`store`] - Durable job store contract, PostgreSQL and in-memory backends
//! - [`queue`] - Queue front-end: enqueue, priority, rate limiting, backoff
//! - [`execution`] - Workers, progress reporting and classified execution errors
//! - [`processors`] - Side-effecting logic for each job kind
//! - [`workflow`] - Sequential, condition-branching workflow interpreter
//! - [`services`] - Collaborator interfaces (storage, notification, tagging)
//! - [`orchestration`] - Manager owning every queue/worker pair, health and stats
//! - [`web`] - HTTP control and observability surface
//! - [`config`] - Layered configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conveyor_core::config::ConveyorConfig;
//! use conveyor_core::orchestration::{OrchestrationManager, Collaborators};
//! use conveyor_core::store::InMemoryJobStore;
//!
//! # async fn example() -> conveyor_core::Result<()> {
//! let store = Arc::new(InMemoryJobStore::new());
//! let manager = OrchestrationManager::new(
//!     ConveyorConfig::default(),
//!     store,
//!     Collaborators::in_memory(),
//! )?;
//! manager.initialize().await?;
//! let health = manager.health_check().await;
//! println!("engine is {}", health.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod processors;
pub mod queue;
pub mod services;
pub mod state_machine;
pub mod store;
pub mod web;
pub mod workflow;

pub use config::{ConfigManager, ConveyorConfig, QueueConfig};
pub use error::{ConveyorError, Result};
pub use execution::{ExecutionError, Worker};
pub use models::{Job, JobId, JobKind, JobOptions, JobPayload};
pub use orchestration::{Collaborators, OrchestrationManager};
pub use queue::Queue;
pub use state_machine::JobState;
pub use store::JobStore;
