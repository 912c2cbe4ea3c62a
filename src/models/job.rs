use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::payloads::{JobKind, JobPayload};
use crate::queue::BackoffPolicy;
use crate::state_machine::JobState;

/// Stable identifier of a job across retries and restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A persisted job record
///
/// Invariant: `attempts_made <= max_attempts`. `attempts_made` counts claimed
/// attempts, so it is incremented when a worker takes the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    pub payload: JobPayload,
    /// Smaller values are serviced first
    pub priority: i32,
    pub delay_ms: u64,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub state: JobState,
    /// 0..=100
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed
    pub run_at: DateTime<Utc>,
    /// When the current or last attempt started
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub failure_metadata: Option<serde_json::Value>,
    pub return_value: Option<serde_json::Value>,
    /// Store-assigned enqueue order, breaks priority ties
    pub sequence: i64,
}

impl Job {
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Whether another attempt may still be claimed
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Zero-based index of the attempt currently running (or last run)
    pub fn attempt_index(&self) -> u32 {
        self.attempts_made.saturating_sub(1)
    }
}

/// Everything a store needs to persist a new job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub id: JobId,
    pub queue_name: String,
    pub payload: JobPayload,
    pub priority: i32,
    pub delay_ms: u64,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub created_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
}

impl NewJob {
    /// State the job enters on insert
    pub fn initial_state(&self) -> JobState {
        if self.run_at > self.created_at {
            JobState::Delayed
        } else {
            JobState::Waiting
        }
    }
}

/// Producer-supplied overrides of the queue's default policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Positive integer; defaults to the queue's payload-derived priority
    pub priority: Option<i32>,
    pub delay_ms: Option<u64>,
    /// Absolute run time; must not be in the past
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

/// Per-state job counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl JobCounts {
    pub fn increment(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Active => self.active += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

impl std::ops::AddAssign for JobCounts {
    fn add_assign(&mut self, other: Self) {
        self.waiting += other.waiting;
        self.active += other.active;
        self.completed += other.completed;
        self.failed += other.failed;
        self.delayed += other.delayed;
    }
}
