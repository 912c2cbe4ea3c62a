//! Outbound webhook-style delivery.
//!
//! Failure classification decides *whether* a retry is worth it:
//!
//! | outcome                        | class     |
//! |--------------------------------|-----------|
//! | no response (connect, timeout) | transient |
//! | 5xx, 429                       | transient |
//! | any other non-2xx              | permanent |
//!
//! The delay between attempts comes from the job's backoff policy.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{payload_mismatch, JobProcessor};
use crate::config::DeliveryConfig;
use crate::constants::system::RESPONSE_SNIPPET_CHARS;
use crate::execution::{ExecutionError, ProgressReporter};
use crate::models::{DeliveryJob, Job, JobKind, JobPayload};

pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";
pub const DELIVERY_ATTEMPT_HEADER: &str = "X-Delivery-Attempt";

#[derive(Debug, Clone)]
pub struct DeliveryProcessor {
    client: Client,
}

impl DeliveryProcessor {
    pub fn new(config: &DeliveryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(&config.user_agent).build()?;
        Ok(Self { client })
    }

    /// Perform one attempt. `attempt` is 1-based.
    pub async fn deliver(
        &self,
        job: &DeliveryJob,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<Value, ExecutionError> {
        let method = Method::from_bytes(job.method.to_uppercase().as_bytes())
            .map_err(|_| ExecutionError::validation(format!("invalid http method '{}'", job.method)))?;
        let metadata = |status: Option<u16>, snippet: Option<&str>| {
            let mut metadata = json!({
                "attemptNumber": attempt,
                "maxRetries": max_attempts,
                "url": job.url,
                "deliveryId": job.delivery_id,
            });
            if let Some(status) = status {
                metadata["status"] = json!(status);
            }
            if let Some(snippet) = snippet {
                metadata["responseSnippet"] = json!(snippet);
            }
            metadata
        };

        let mut request = self
            .client
            .request(method, &job.url)
            .timeout(Duration::from_millis(job.timeout_ms))
            .header(DELIVERY_ID_HEADER, &job.delivery_id)
            .header(DELIVERY_ATTEMPT_HEADER, attempt.to_string());
        for (name, value) in &job.headers {
            request = request.header(name, value);
        }
        if let Some(payload) = &job.payload {
            request = request.json(payload);
        }

        debug!(delivery_id = %job.delivery_id, url = %job.url, attempt, "🚚 Dispatching delivery");
        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                let message = if error.is_timeout() {
                    format!("delivery timed out after {}ms", job.timeout_ms)
                } else {
                    format!("no response from {}: {error}", job.url)
                };
                warn!(delivery_id = %job.delivery_id, attempt, error = %error, "delivery got no response");
                return Err(ExecutionError::transient(message).with_metadata(metadata(None, None)));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(RESPONSE_SNIPPET_CHARS).collect();
        let duration_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            return Ok(json!({
                "status": status.as_u16(),
                "responseSnippet": snippet,
                "durationMs": duration_ms,
                "deliveryId": job.delivery_id,
            }));
        }

        let message = format!("{} responded {status}", job.url);
        let metadata = metadata(Some(status.as_u16()), Some(&snippet));
        if is_transient_status(status) {
            Err(ExecutionError::transient(message).with_metadata(metadata))
        } else {
            Err(ExecutionError::permanent(message).with_metadata(metadata))
        }
    }
}

/// 5xx and 429 may succeed later; other client errors will not
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl JobProcessor for DeliveryProcessor {
    fn kind(&self) -> JobKind {
        JobKind::Delivery
    }

    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, ExecutionError> {
        let JobPayload::Delivery(delivery) = &job.payload else {
            return Err(payload_mismatch(JobKind::Delivery, job));
        };
        let result = self
            .deliver(delivery, job.attempts_made.max(1), job.max_attempts)
            .await?;
        progress.update(100).await;
        Ok(result)
    }
}
