//! # Control Surface Errors
//!
//! `ApiError` maps engine failures to HTTP responses with a JSON body of the
//! form `{"error": {"code", "message"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::error::ConveyorError;
use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Service temporarily unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_code) = match &self {
            ApiError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            ApiError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let error_response = json!({
            "error": {
                "code": error_code,
                "message": self.to_string()
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => ApiError::ServiceUnavailable { message },
            StoreError::JobNotFound { job_id } => ApiError::not_found(format!("job {job_id}")),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Store(store) => store.into(),
            other if other.is_validation() => ApiError::bad_request(other.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<ConveyorError> for ApiError {
    fn from(err: ConveyorError) -> Self {
        match err {
            ConveyorError::Store(store) => store.into(),
            ConveyorError::Queue(queue) => queue.into(),
            other => ApiError::internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
