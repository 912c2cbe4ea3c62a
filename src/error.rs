use thiserror::Error;

use crate::config::ConfigurationError;
use crate::execution::ExecutionError;
use crate::queue::QueueError;
use crate::services::ServiceError;
use crate::store::StoreError;

/// Crate-wide error type aggregating every layer's failures
#[derive(Debug, Error)]
pub enum ConveyorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Orchestration error: {0}")]
    Orchestration(String),
}

impl ConveyorError {
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ConveyorError>;
