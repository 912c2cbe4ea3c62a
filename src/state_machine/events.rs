use serde::{Deserialize, Serialize};
use std::fmt;

/// Events that drive job state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    /// A worker claimed the job
    Claim,
    /// The processor succeeded
    Complete,
    /// The attempt failed and another one is scheduled
    Retry,
    /// The job failed terminally
    Fail,
    /// The claiming worker disappeared; the job goes back to waiting
    Stalled,
    /// An operator re-enqueued a failed job
    RetryFailed,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Claim => "claim",
            Self::Complete => "complete",
            Self::Retry => "retry",
            Self::Fail => "fail",
            Self::Stalled => "stalled",
            Self::RetryFailed => "retry_failed",
        };
        f.write_str(name)
    }
}
