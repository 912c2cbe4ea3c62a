use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{payload_mismatch, JobProcessor};
use crate::execution::{ExecutionError, ProgressReporter};
use crate::models::{Job, JobKind, JobPayload, NotificationJob};
use crate::services::NotificationSender;

/// Sends templated messages through the notification collaborator
#[derive(Debug, Clone)]
pub struct NotificationProcessor {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationProcessor {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, job: &NotificationJob) -> Result<Value, ExecutionError> {
        let receipt = self
            .sender
            .send(&job.to, &job.template, &job.variables, &job.attachments)
            .await
            .map_err(|e| ExecutionError::from(e).context("notification"))?;

        Ok(json!({
            "messageId": receipt.message_id,
            "to": job.to,
            "template": job.template,
        }))
    }
}

#[async_trait]
impl JobProcessor for NotificationProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Notification
    }

    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, ExecutionError> {
        let JobPayload::Notification(notification) = &job.payload else {
            return Err(payload_mismatch(JobKind::Notification, job));
        };
        let result = self.send(notification).await?;
        progress.update(100).await;
        Ok(result)
    }
}
