//! # System Constants
//!
//! Queue names, default execution limits and lifecycle event names that define
//! the operational boundaries of the job engine.

/// Fixed queue names, one per job kind
pub mod queues {
    pub const NOTIFICATION: &str = "notification";
    pub const DELIVERY: &str = "delivery";
    pub const DOCUMENT: &str = "document-generation";
    pub const MEDIA: &str = "media-transformation";
    pub const WORKFLOW: &str = "workflow";
}

/// Job lifecycle events used as the `operation` field of structured logs
pub mod events {
    pub const JOB_ENQUEUED: &str = "job.enqueued";
    pub const JOB_CLAIMED: &str = "job.claimed";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_STALLED: &str = "job.stalled";
    pub const JOB_REMOVED: &str = "job.removed";

    pub const QUEUE_PAUSED: &str = "queue.paused";
    pub const QUEUE_RESUMED: &str = "queue.resumed";
    pub const QUEUE_DRAINED: &str = "queue.drained";
    pub const QUEUE_CLEANED: &str = "queue.cleaned";
    pub const QUEUE_CLOSED: &str = "queue.closed";

    pub const WORKFLOW_STEP_COMPLETED: &str = "workflow.step_completed";
    pub const WORKFLOW_STEP_SKIPPED: &str = "workflow.step_skipped";
    pub const WORKFLOW_STEP_FAILED: &str = "workflow.step_failed";
}

/// System-wide defaults
pub mod system {
    /// Maximum characters of a delivery response body kept in job results
    pub const RESPONSE_SNIPPET_CHARS: usize = 500;

    /// Upper bound for exponential backoff beyond the delivery ladder (ms)
    pub const DELIVERY_MAX_BACKOFF_MS: u64 = 30_000;

    /// Delivery ladder: delay after the first, second and third failed attempt (ms)
    pub const DELIVERY_BACKOFF_LADDER_MS: [u64; 3] = [1_000, 5_000, 15_000];

    /// Worker poll interval when a queue is empty or paused (ms)
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

    /// Extra time an active job may run past its timeout before it counts as stalled (ms)
    pub const DEFAULT_STALL_GRACE_MS: u64 = 30_000;

    /// Interval between stalled-job sweeps (ms)
    pub const DEFAULT_STALL_CHECK_INTERVAL_MS: u64 = 30_000;

    /// Default limit for job listings on the control surface
    pub const DEFAULT_LIST_LIMIT: i64 = 100;

    /// Largest retention window accepted by `POST /jobs/clean` (days)
    pub const MAX_CLEAN_DAYS: u32 = 36_500;

    /// Default execution timeout for queues without an explicit one (ms)
    pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 60_000;
}
