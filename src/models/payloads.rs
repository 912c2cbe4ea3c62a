//! Payload variants carried by jobs, one per queue.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::workflow::{StepAction, WorkflowJob, WorkflowStep};
use crate::constants::queues;

/// The five job kinds, each served by its own queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Notification,
    Delivery,
    Document,
    Media,
    Workflow,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Notification,
        JobKind::Delivery,
        JobKind::Document,
        JobKind::Media,
        JobKind::Workflow,
    ];

    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::Notification => queues::NOTIFICATION,
            JobKind::Delivery => queues::DELIVERY,
            JobKind::Document => queues::DOCUMENT,
            JobKind::Media => queues::MEDIA,
            JobKind::Workflow => queues::WORKFLOW,
        }
    }

    /// Key used for this kind in configuration files
    pub fn config_key(&self) -> &'static str {
        match self {
            JobKind::Notification => "notification",
            JobKind::Delivery => "delivery",
            JobKind::Document => "document",
            JobKind::Media => "media",
            JobKind::Workflow => "workflow",
        }
    }

    pub fn from_queue_name(name: &str) -> Option<JobKind> {
        Self::ALL.into_iter().find(|kind| kind.queue_name() == name)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

/// Tagged payload of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    Notification(NotificationJob),
    Delivery(DeliveryJob),
    Document(DocumentJob),
    Media(MediaJob),
    Workflow(WorkflowJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Notification(_) => JobKind::Notification,
            JobPayload::Delivery(_) => JobKind::Delivery,
            JobPayload::Document(_) => JobKind::Document,
            JobPayload::Media(_) => JobKind::Media,
            JobPayload::Workflow(_) => JobKind::Workflow,
        }
    }

    /// Structural validation performed synchronously at enqueue
    pub fn validate(&self) -> Result<(), String> {
        match self {
            JobPayload::Notification(job) => job.validate(),
            JobPayload::Delivery(job) => job.validate(),
            JobPayload::Document(job) => job.validate(),
            JobPayload::Media(job) => job.validate(),
            JobPayload::Workflow(job) => job.validate(),
        }
    }
}

/// A file attached to a notification, fetched from storage at send time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub storage_key: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub to: String,
    pub template: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl NotificationJob {
    pub fn validate(&self) -> Result<(), String> {
        if self.to.trim().is_empty() {
            return Err("notification recipient is empty".to_string());
        }
        if self.template.trim().is_empty() {
            return Err("notification template is empty".to_string());
        }
        Ok(())
    }
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

/// Outbound webhook-style dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts allowed for this delivery
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub delivery_id: String,
}

impl DeliveryJob {
    pub fn validate(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| format!("invalid delivery url '{}': {e}", self.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported delivery scheme '{}'", url.scheme()));
        }
        reqwest::Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| format!("invalid http method '{}'", self.method))?;
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        if self.delivery_id.trim().is_empty() {
            return Err("delivery_id is empty".to_string());
        }
        Ok(())
    }
}

/// Output formats for generated documents, ordered by generation cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Csv,
    Spreadsheet,
    Pdf,
}

impl DocumentFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentFormat::Csv => "text/csv",
            DocumentFormat::Spreadsheet => "application/vnd.ms-excel",
            DocumentFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Csv => "csv",
            DocumentFormat::Spreadsheet => "xml",
            DocumentFormat::Pdf => "pdf",
        }
    }
}

/// Tabular report rendered to CSV, spreadsheet or PDF and uploaded to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentJob {
    pub document_id: String,
    pub format: DocumentFormat,
    #[serde(default)]
    pub title: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    pub destination_key: String,
}

impl DocumentJob {
    pub fn validate(&self) -> Result<(), String> {
        if self.columns.is_empty() {
            return Err("document has no columns".to_string());
        }
        if self.destination_key.trim().is_empty() {
            return Err("document destination_key is empty".to_string());
        }
        if let Some((index, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(format!(
                "row {index} has {} cells, expected {}",
                row.len(),
                self.columns.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFit {
    /// Scale to fit inside the box, preserving aspect ratio
    #[default]
    Contain,
    /// Scale and crop to fill the box exactly
    Cover,
    /// Stretch to the exact box
    Fill,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

fn default_opacity() -> f32 {
    0.5
}

fn default_confidence() -> f32 {
    0.5
}

fn default_max_tags() -> usize {
    10
}

/// One step of the media pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MediaOperation {
    Resize {
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default)]
        fit: ResizeFit,
    },
    /// Exactly one of `text` or `asset_ref` must be set
    Watermark {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        asset_ref: Option<String>,
        #[serde(default)]
        position: WatermarkPosition,
        #[serde(default = "default_opacity")]
        opacity: f32,
    },
    /// Collects labels side-band, never mutates the image
    Tag {
        #[serde(default = "default_confidence")]
        confidence: f32,
        #[serde(default = "default_max_tags")]
        max_tags: usize,
    },
}

impl MediaOperation {
    pub fn name(&self) -> &'static str {
        match self {
            MediaOperation::Resize { .. } => "resize",
            MediaOperation::Watermark { .. } => "watermark",
            MediaOperation::Tag { .. } => "tag",
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            MediaOperation::Resize { width, height, .. } => {
                if width.is_none() && height.is_none() {
                    return Err("resize needs a width or a height".to_string());
                }
                if *width == Some(0) || *height == Some(0) {
                    return Err("resize dimensions must be positive".to_string());
                }
            }
            MediaOperation::Watermark {
                text,
                asset_ref,
                opacity,
                ..
            } => {
                if text.is_some() == asset_ref.is_some() {
                    return Err("watermark needs exactly one of text or asset_ref".to_string());
                }
                if !(0.0..=1.0).contains(opacity) {
                    return Err(format!("watermark opacity {opacity} outside 0..=1"));
                }
            }
            MediaOperation::Tag {
                confidence,
                max_tags,
            } => {
                if !(0.0..=1.0).contains(confidence) {
                    return Err(format!("tag confidence {confidence} outside 0..=1"));
                }
                if *max_tags == 0 {
                    return Err("max_tags must be at least 1".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

fn default_quality() -> u8 {
    85
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub format: OutputFormat,
    /// 1..=100, used by lossy formats
    #[serde(default = "default_quality")]
    pub quality: u8,
    pub destination_key: String,
}

/// Media transformation pipeline over one source asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    pub asset_id: String,
    pub source_key: String,
    pub operations: Vec<MediaOperation>,
    pub output: OutputSpec,
}

impl MediaJob {
    pub fn validate(&self) -> Result<(), String> {
        if self.source_key.trim().is_empty() {
            return Err("media source_key is empty".to_string());
        }
        if self.output.destination_key.trim().is_empty() {
            return Err("media destination_key is empty".to_string());
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(format!("quality {} outside 1..=100", self.output.quality));
        }
        for (index, operation) in self.operations.iter().enumerate() {
            operation
                .validate()
                .map_err(|e| format!("operation {index} ({}): {e}", operation.name()))?;
        }
        Ok(())
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.iter().any(|op| op.name() == name)
    }
}

impl WorkflowJob {
    pub fn validate(&self) -> Result<(), String> {
        if self.steps.is_empty() {
            return Err(format!("workflow {} has no steps", self.workflow_id));
        }
        let mut seen = HashSet::new();
        validate_steps(&self.steps, &mut seen)
    }
}

fn validate_steps<'a>(steps: &'a [WorkflowStep], seen: &mut HashSet<&'a str>) -> Result<(), String> {
    for step in steps {
        if step.id.trim().is_empty() {
            return Err("workflow step id is empty".to_string());
        }
        if !seen.insert(step.id.as_str()) {
            return Err(format!("duplicate workflow step id '{}'", step.id));
        }
        let nested = match &step.action {
            StepAction::Notify(job) => job.validate(),
            StepAction::Deliver(job) => job.validate(),
            StepAction::Delay(_) => Ok(()),
            StepAction::TransformMedia(job) => job.validate(),
            StepAction::GenerateDocument(job) => job.validate(),
            StepAction::Branch(branch) => {
                validate_steps(&branch.on_true, seen)?;
                validate_steps(&branch.on_false, seen)
            }
        };
        nested.map_err(|e| format!("step '{}': {e}", step.id))?;
    }
    Ok(())
}
