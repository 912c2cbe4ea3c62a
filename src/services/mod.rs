//! # External Collaborators
//!
//! The engine performs side effects through narrow collaborator traits so
//! processors can be exercised without real infrastructure:
//!
//! - [`StorageClient`]: object storage for source assets and generated output
//! - [`NotificationSender`]: templated message delivery (email, SMS, ...)
//! - [`ImageTagger`]: labels for an image, used by the media `tag` operation
//!
//! In-process implementations are provided for tests and local runs.

pub mod notification;
pub mod storage;
pub mod tagging;

pub use notification::{LoggingNotificationSender, SentNotification};
pub use storage::InMemoryStorage;
pub use tagging::HeuristicImageTagger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::Attachment;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("{service} unavailable: {message}")]
    Unavailable { service: String, message: String },

    #[error("{service} rejected request: {message}")]
    Rejected { service: String, message: String },
}

impl ServiceError {
    pub fn unavailable(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Rejected {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Unavailability may clear up; a missing object or a rejection will not
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[async_trait]
pub trait StorageClient: Send + Sync + std::fmt::Debug {
    /// Store `bytes` under `key` and return a URL for the stored object
    async fn upload(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> ServiceResult<String>;

    async fn download(&self, key: &str) -> ServiceResult<Vec<u8>>;
}

/// Receipt returned by a [`NotificationSender`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait NotificationSender: Send + Sync + std::fmt::Debug {
    async fn send(
        &self,
        to: &str,
        template: &str,
        variables: &Map<String, Value>,
        attachments: &[Attachment],
    ) -> ServiceResult<NotificationReceipt>;
}

/// A label with the tagger's confidence in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub label: String,
    pub confidence: f32,
}

#[async_trait]
pub trait ImageTagger: Send + Sync + std::fmt::Debug {
    /// Labels for `image`, sorted by descending confidence
    async fn tag(&self, image: &image::DynamicImage) -> ServiceResult<Vec<ImageTag>>;
}
