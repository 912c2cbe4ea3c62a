use serde::{Deserialize, Serialize};
use std::fmt;

use super::events::JobEvent;
use super::StateMachineError;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for claiming now
    Waiting,
    /// Eligible once its `run_at` has passed
    Delayed,
    /// Claimed by a worker
    Active,
    /// Processor succeeded
    Completed,
    /// Attempts exhausted or failure was not retryable
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    /// Check if this is a terminal state (no further transitions without operator action)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Waiting and delayed jobs can be removed without affecting a worker
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Compute the state reached by applying `event`
    pub fn transition(self, event: JobEvent) -> Result<JobState, StateMachineError> {
        let next = match (self, event) {
            (Self::Waiting | Self::Delayed, JobEvent::Claim) => Self::Active,
            (Self::Active, JobEvent::Complete) => Self::Completed,
            (Self::Active, JobEvent::Retry) => Self::Delayed,
            (Self::Active, JobEvent::Fail) => Self::Failed,
            (Self::Active, JobEvent::Stalled) => Self::Waiting,
            (Self::Failed, JobEvent::RetryFailed) => Self::Waiting,
            (from, event) => return Err(StateMachineError::InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "delayed" => Ok(Self::Delayed),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}
