//! # Job Store
//!
//! The durable substrate every queue and worker shares. A store is an ordered,
//! atomically-mutable collection of job records keyed by queue name; it is the
//! only shared mutable resource in the engine.
//!
//! ## Contract
//!
//! - `claim_next` is atomic: two workers on the same queue never receive the
//!   same job. Jobs are handed out by ascending `priority`, ties broken by
//!   enqueue `sequence`; a paused queue yields nothing.
//! - Every transition goes through [`JobState::transition`], so an illegal
//!   move is reported as [`StoreError::InvalidTransition`] by every backend.
//! - Records survive process restart for durable backends ([`PgJobStore`]).
//!   [`InMemoryJobStore`] implements the same contract for tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Job, JobCounts, JobId, NewJob};
use crate::state_machine::{JobEvent, JobState, StateMachineError};

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Job {job_id} is active and cannot be removed")]
    JobActive { job_id: JobId },

    #[error("Invalid transition for job {job_id}: {source}")]
    InvalidTransition {
        job_id: JobId,
        #[source]
        source: StateMachineError,
    },

    #[error("Database query error: {operation}: {message}")]
    Query { operation: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn query(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Query {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_transition(job_id: JobId, from: JobState, event: JobEvent) -> Self {
        Self::InvalidTransition {
            job_id,
            source: StateMachineError::InvalidTransition { from, event },
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a stalled-job sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalledRecovery {
    /// Returned to `waiting` for another attempt
    pub requeued: u64,
    /// Moved to `failed` because no attempts remain
    pub failed: u64,
}

/// Reason recorded on jobs that stalled with no attempts left
pub const STALLED_FAILURE_REASON: &str = "job stalled more than allowable limit";

#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    /// Verify the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Persist a new job in `waiting` or `delayed` state
    async fn insert(&self, job: NewJob) -> StoreResult<Job>;

    /// Persist several jobs; either all are stored or none
    async fn insert_bulk(&self, jobs: Vec<NewJob>) -> StoreResult<Vec<Job>>;

    /// Atomically claim the most urgent eligible job of `queue`
    ///
    /// Eligible: `waiting` or `delayed` with `run_at <= now` and attempts
    /// remaining, on a queue that is not paused. The claimed job is `active`
    /// with `attempts_made` incremented and `processed_at = now`.
    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> StoreResult<Option<Job>>;

    async fn update_progress(&self, id: JobId, progress: u8) -> StoreResult<()>;

    /// `active → completed`
    async fn complete(&self, id: JobId, return_value: serde_json::Value) -> StoreResult<Job>;

    /// `active → delayed` with a new run time and priority
    async fn schedule_retry(
        &self,
        id: JobId,
        run_at: DateTime<Utc>,
        priority: i32,
        reason: &str,
    ) -> StoreResult<Job>;

    /// `active → failed`
    async fn fail(
        &self,
        id: JobId,
        reason: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<Job>;

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// Jobs of `queue` in `state`, most recent first for terminal states,
    /// claim order otherwise
    async fn list(&self, queue: &str, state: JobState, limit: i64) -> StoreResult<Vec<Job>>;

    async fn counts(&self, queue: &str) -> StoreResult<JobCounts>;

    /// Remove a `waiting`/`delayed`/terminal job; returns `false` if unknown
    ///
    /// Active jobs cannot be removed ([`StoreError::JobActive`]).
    async fn remove(&self, id: JobId) -> StoreResult<bool>;

    /// Remove every `waiting` and `delayed` job of `queue`
    async fn drain(&self, queue: &str) -> StoreResult<u64>;

    /// Remove jobs in terminal `state` that finished before `older_than`
    async fn clean(&self, queue: &str, older_than: DateTime<Utc>, state: JobState)
        -> StoreResult<u64>;

    /// Keep only the `keep` most recently finished jobs in terminal `state`
    async fn trim(&self, queue: &str, state: JobState, keep: u64) -> StoreResult<u64>;

    /// `failed → waiting` with a fresh attempt budget
    async fn retry_failed(&self, id: JobId) -> StoreResult<Job>;

    /// Return jobs active since before `active_before` to `waiting`, or fail
    /// them when no attempts remain
    async fn recover_stalled(
        &self,
        queue: &str,
        active_before: DateTime<Utc>,
    ) -> StoreResult<StalledRecovery>;

    async fn set_paused(&self, queue: &str, paused: bool) -> StoreResult<()>;

    async fn is_paused(&self, queue: &str) -> StoreResult<bool>;
}
