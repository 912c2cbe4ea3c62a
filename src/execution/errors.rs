use serde_json::{json, Value};
use thiserror::Error;

use crate::services::ServiceError;

/// Classified outcome of a failed attempt
///
/// The variant decides retry eligibility: the worker consults
/// [`is_retryable`](Self::is_retryable) before it looks at the remaining
/// attempt budget, so a permanent failure never consumes further attempts.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// Network trouble, timeouts, 5xx/429 responses, collaborator outages
    #[error("{message}")]
    Transient {
        message: String,
        metadata: Option<Value>,
    },

    /// Failures that will recur on every attempt
    #[error("{message}")]
    Permanent {
        message: String,
        metadata: Option<Value>,
    },

    /// A workflow step failed; terminal for the whole workflow run
    #[error("workflow failed at step {step_id}: {cause}")]
    WorkflowAbort {
        step_id: String,
        cause: String,
        completed_steps: Vec<String>,
        failed_steps: Vec<String>,
    },

    #[error("job timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid job: {message}")]
    Validation { message: String },
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            metadata: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            metadata: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Attach failure metadata; ignored by variants that derive their own
    pub fn with_metadata(mut self, value: Value) -> Self {
        match &mut self {
            Self::Transient { metadata, .. } | Self::Permanent { metadata, .. } => {
                *metadata = Some(value);
            }
            Self::WorkflowAbort { .. } | Self::Timeout { .. } | Self::Validation { .. } => {}
        }
        self
    }

    /// Prefix the message with where the failure happened
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::Transient { message, metadata } => Self::Transient {
                message: format!("{context}: {message}"),
                metadata,
            },
            Self::Permanent { message, metadata } => Self::Permanent {
                message: format!("{context}: {message}"),
                metadata,
            },
            Self::Validation { message } => Self::Validation {
                message: format!("{context}: {message}"),
            },
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Metadata recorded on the job when this error is terminal
    pub fn metadata(&self) -> Option<Value> {
        match self {
            Self::Transient { metadata, .. } | Self::Permanent { metadata, .. } => metadata.clone(),
            Self::WorkflowAbort {
                step_id,
                completed_steps,
                failed_steps,
                ..
            } => Some(json!({
                "failedStep": step_id,
                "completedSteps": completed_steps,
                "failedSteps": failed_steps,
            })),
            Self::Timeout { timeout_ms } => Some(json!({ "timeoutMs": timeout_ms })),
            Self::Validation { .. } => None,
        }
    }

    /// Short classification label for logs and stats
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::WorkflowAbort { .. } => "workflow_abort",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
        }
    }
}

impl From<ServiceError> for ExecutionError {
    fn from(error: ServiceError) -> Self {
        if error.is_retryable() {
            Self::transient(error.to_string())
        } else {
            Self::permanent(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_by_variant() {
        assert!(ExecutionError::transient("503").is_retryable());
        assert!(ExecutionError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(!ExecutionError::permanent("404").is_retryable());
        assert!(!ExecutionError::validation("bad").is_retryable());

        let abort = ExecutionError::WorkflowAbort {
            step_id: "b".to_string(),
            cause: "boom".to_string(),
            completed_steps: vec!["a".to_string()],
            failed_steps: vec!["b".to_string()],
        };
        assert!(!abort.is_retryable());
        assert_eq!(abort.to_string(), "workflow failed at step b: boom");
        assert_eq!(abort.metadata().unwrap()["completedSteps"], json!(["a"]));
    }

    #[test]
    fn test_context_prefixes_message() {
        let error = ExecutionError::permanent("decode failed").context("resize");
        assert_eq!(error.to_string(), "resize: decode failed");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_service_error_classification() {
        let outage: ExecutionError = ServiceError::unavailable("storage", "timeout").into();
        assert!(outage.is_retryable());

        let missing: ExecutionError = ServiceError::NotFound {
            key: "k".to_string(),
        }
        .into();
        assert!(!missing.is_retryable());
    }
}
