//! # Job Processors
//!
//! One [`JobProcessor`] per job kind. A processor performs the side effect
//! for a claimed job and classifies any failure as an [`ExecutionError`];
//! deciding whether to retry is left to the worker.

pub mod delivery;
pub mod document;
pub mod media;
pub mod notification;
pub mod watermark;
pub mod workflow;

pub use delivery::DeliveryProcessor;
pub use document::DocumentProcessor;
pub use media::MediaProcessor;
pub use notification::NotificationProcessor;
pub use workflow::{ProcessorEffects, WorkflowProcessor};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::DeliveryConfig;
use crate::execution::{ExecutionError, ProgressReporter};
use crate::models::{Job, JobKind};
use crate::orchestration::Collaborators;

#[async_trait]
pub trait JobProcessor: Send + Sync + std::fmt::Debug {
    /// Kind of job this processor accepts
    fn kind(&self) -> JobKind;

    /// Run one attempt of `job`, returning the value recorded on completion
    async fn process(&self, job: &Job, progress: &ProgressReporter)
        -> Result<Value, ExecutionError>;
}

/// Error for a job whose payload does not belong to the processor's queue
pub(crate) fn payload_mismatch(expected: JobKind, job: &Job) -> ExecutionError {
    ExecutionError::validation(format!(
        "{expected} processor received a {} payload for job {}",
        job.kind(),
        job.id
    ))
}

/// The five processors wired to one set of collaborators
#[derive(Debug, Clone)]
pub struct ProcessorSet {
    pub notification: Arc<NotificationProcessor>,
    pub delivery: Arc<DeliveryProcessor>,
    pub document: Arc<DocumentProcessor>,
    pub media: Arc<MediaProcessor>,
    pub workflow: Arc<WorkflowProcessor>,
}

impl ProcessorSet {
    pub fn new(
        collaborators: &Collaborators,
        delivery_config: &DeliveryConfig,
    ) -> Result<Self, reqwest::Error> {
        let notification = Arc::new(NotificationProcessor::new(Arc::clone(
            &collaborators.notifications,
        )));
        let delivery = Arc::new(DeliveryProcessor::new(delivery_config)?);
        let document = Arc::new(DocumentProcessor::new(Arc::clone(&collaborators.storage)));
        let media = Arc::new(MediaProcessor::new(
            Arc::clone(&collaborators.storage),
            Arc::clone(&collaborators.tagger),
        ));
        let effects = ProcessorEffects {
            notification: Arc::clone(&notification),
            delivery: Arc::clone(&delivery),
            document: Arc::clone(&document),
            media: Arc::clone(&media),
        };
        let workflow = Arc::new(WorkflowProcessor::new(Arc::new(effects)));

        Ok(Self {
            notification,
            delivery,
            document,
            media,
            workflow,
        })
    }

    pub fn for_kind(&self, kind: JobKind) -> Arc<dyn JobProcessor> {
        match kind {
            JobKind::Notification => self.notification.clone(),
            JobKind::Delivery => self.delivery.clone(),
            JobKind::Document => self.document.clone(),
            JobKind::Media => self.media.clone(),
            JobKind::Workflow => self.workflow.clone(),
        }
    }
}
