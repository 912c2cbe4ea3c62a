use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{
    payload_mismatch, DeliveryProcessor, DocumentProcessor, JobProcessor, MediaProcessor,
    NotificationProcessor,
};
use crate::execution::{ExecutionError, ProgressReporter};
use crate::models::{
    DeliveryJob, DocumentJob, Job, JobKind, JobPayload, MediaJob, NotificationJob,
};
use crate::workflow::{StepEffects, WorkflowInterpreter};

/// Step side effects backed by the queue processors
///
/// A `deliver` step makes a single attempt with its own `max_retries` as the
/// advertised budget; retrying is the workflow job's concern.
#[derive(Debug, Clone)]
pub struct ProcessorEffects {
    pub notification: Arc<NotificationProcessor>,
    pub delivery: Arc<DeliveryProcessor>,
    pub document: Arc<DocumentProcessor>,
    pub media: Arc<MediaProcessor>,
}

#[async_trait]
impl StepEffects for ProcessorEffects {
    async fn notify(&self, job: &NotificationJob) -> Result<Value, ExecutionError> {
        self.notification.send(job).await
    }

    async fn deliver(&self, job: &DeliveryJob) -> Result<Value, ExecutionError> {
        self.delivery.deliver(job, 1, job.max_retries).await
    }

    async fn transform_media(&self, job: &MediaJob) -> Result<Value, ExecutionError> {
        self.media.transform(job, None).await
    }

    async fn generate_document(&self, job: &DocumentJob) -> Result<Value, ExecutionError> {
        self.document.generate(job, None).await
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowProcessor {
    interpreter: WorkflowInterpreter,
}

impl WorkflowProcessor {
    pub fn new(effects: Arc<dyn StepEffects>) -> Self {
        Self {
            interpreter: WorkflowInterpreter::new(effects),
        }
    }
}

#[async_trait]
impl JobProcessor for WorkflowProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Workflow
    }

    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, ExecutionError> {
        let JobPayload::Workflow(workflow) = &job.payload else {
            return Err(payload_mismatch(JobKind::Workflow, job));
        };
        let outcome = self.interpreter.run(workflow, Some(progress)).await?;
        Ok(json!({
            "workflowId": outcome.workflow_id,
            "status": "completed",
            "completedSteps": outcome.completed_steps,
            "skippedSteps": outcome.skipped_steps,
            "context": outcome.context,
        }))
    }
}
