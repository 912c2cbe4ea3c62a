//! # Data Models
//!
//! Job records as persisted by the store, the five payload variants a job can
//! carry, and the workflow step definitions interpreted by the workflow queue.

pub mod job;
pub mod payloads;
pub mod workflow;

pub use job::{Job, JobCounts, JobId, JobOptions, NewJob};
pub use payloads::{
    Attachment, DeliveryJob, DocumentFormat, DocumentJob, JobKind, JobPayload, MediaJob,
    MediaOperation, NotificationJob, OutputFormat, OutputSpec, ResizeFit, WatermarkPosition,
};
pub use workflow::{
    BranchConfig, ConditionOperator, DelayConfig, StepAction, StepKind, WorkflowCondition,
    WorkflowJob, WorkflowStep,
};
