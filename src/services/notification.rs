use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use super::{NotificationReceipt, NotificationSender, ServiceError, ServiceResult};
use crate::models::Attachment;

/// A message accepted by [`LoggingNotificationSender`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub message_id: String,
    pub to: String,
    pub template: String,
    pub variables: Map<String, Value>,
    pub attachments: Vec<String>,
}

/// Sender that logs each message and keeps it for inspection
///
/// Recipients listed with [`reject`](Self::reject) are refused, which lets
/// tests drive the permanent-failure path.
#[derive(Debug, Default)]
pub struct LoggingNotificationSender {
    sent: Mutex<Vec<SentNotification>>,
    rejected: Mutex<Vec<String>>,
}

impl LoggingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, recipient: impl Into<String>) {
        self.rejected.lock().push(recipient.into());
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send(
        &self,
        to: &str,
        template: &str,
        variables: &Map<String, Value>,
        attachments: &[Attachment],
    ) -> ServiceResult<NotificationReceipt> {
        if self.rejected.lock().iter().any(|r| r == to) {
            return Err(ServiceError::rejected(
                "notification",
                format!("recipient {to} refused"),
            ));
        }

        let message_id = format!("msg-{}", Uuid::new_v4());
        info!(
            message_id = %message_id,
            to = %to,
            template = %template,
            attachments = attachments.len(),
            "📧 Notification sent"
        );

        self.sent.lock().push(SentNotification {
            message_id: message_id.clone(),
            to: to.to_string(),
            template: template.to_string(),
            variables: variables.clone(),
            attachments: attachments.iter().map(|a| a.filename.clone()).collect(),
        });
        Ok(NotificationReceipt { message_id })
    }
}
