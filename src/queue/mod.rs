//! # Queues
//!
//! A [`Queue`] is a typed, named channel over the [`JobStore`]: it validates
//! and stamps producer jobs with the queue's default policy (attempts,
//! backoff, payload-derived priority) and exposes the administrative
//! operations (pause, resume, drain, clean, close) the orchestration layer
//! fans out across all five queues.
//!
//! ```rust,no_run
//! use conveyor_core::config::ConveyorConfig;
//! use conveyor_core::models::{JobKind, JobOptions, JobPayload, NotificationJob};
//! use conveyor_core::queue::Queue;
//! use conveyor_core::store::InMemoryJobStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), conveyor_core::queue::QueueError> {
//! let config = ConveyorConfig::default();
//! let queue = Queue::new(
//!     JobKind::Notification,
//!     config.queues.notification.clone(),
//!     Arc::new(InMemoryJobStore::new()),
//! );
//! let job = queue
//!     .enqueue(
//!         JobPayload::Notification(NotificationJob {
//!             to: "client@example.com".to_string(),
//!             template: "gallery-ready".to_string(),
//!             variables: Default::default(),
//!             attachments: vec![],
//!         }),
//!         JobOptions::default(),
//!     )
//!     .await?;
//! println!("enqueued {}", job.id);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod priority;
pub mod rate_limiter;

pub use backoff::BackoffPolicy;
pub use priority::default_priority;
pub use rate_limiter::RateLimiter;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::constants::events;
use crate::logging::{log_job_operation, log_queue_operation};
use crate::models::{Job, JobCounts, JobId, JobKind, JobOptions, JobPayload, NewJob};
use crate::state_machine::JobState;
use crate::store::{JobStore, StalledRecovery, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Scheduled time {scheduled_at} is in the past (now {now})")]
    InvalidSchedule {
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Invalid job for queue {queue}: {message}")]
    Validation { queue: String, message: String },

    #[error("Job {job_id} is active and cannot be removed")]
    JobActive { job_id: JobId },

    #[error("Queue {queue} is closed")]
    Closed { queue: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    fn validation(queue: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            queue: queue.to_string(),
            message: message.into(),
        }
    }

    /// Rejected synchronously at enqueue; never retried
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidSchedule { .. } | Self::Validation { .. })
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug)]
pub struct Queue {
    name: String,
    kind: JobKind,
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    limiter: Option<Arc<RateLimiter>>,
    wakeup: Arc<Notify>,
    closed: AtomicBool,
}

impl Queue {
    pub fn new(kind: JobKind, config: QueueConfig, store: Arc<dyn JobStore>) -> Self {
        let limiter = config.rate_limit.map(|limit| Arc::new(RateLimiter::new(limit)));
        Self {
            name: kind.queue_name().to_string(),
            kind,
            config,
            store,
            limiter,
            wakeup: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// Execution timeout for one attempt
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Resolves when new work may be available (enqueue, resume, retry, close)
    pub async fn notified(&self) {
        self.wakeup.notified().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueue one job
    ///
    /// `scheduled_at` wins over `delay_ms`; a scheduled time in the past is
    /// rejected with [`QueueError::InvalidSchedule`] and nothing is stored.
    pub async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> QueueResult<Job> {
        let job = self.prepare(payload, options, Utc::now())?;
        let job = self.store.insert(job).await?;

        log_job_operation(
            events::JOB_ENQUEUED,
            &self.name,
            &job.id.to_string(),
            job.attempts_made,
            Some(&format!("priority={} state={}", job.priority, job.state)),
        );
        self.wakeup.notify_one();
        Ok(job)
    }

    /// Enqueue one job to run at `at`
    pub async fn enqueue_scheduled(
        &self,
        payload: JobPayload,
        at: DateTime<Utc>,
        options: JobOptions,
    ) -> QueueResult<Job> {
        self.enqueue(payload, options.scheduled_at(at)).await
    }

    /// Enqueue several jobs; one invalid item rejects the whole batch
    pub async fn enqueue_bulk(&self, items: Vec<(JobPayload, JobOptions)>) -> QueueResult<Vec<Job>> {
        let now = Utc::now();
        let jobs = items
            .into_iter()
            .map(|(payload, options)| self.prepare(payload, options, now))
            .collect::<QueueResult<Vec<_>>>()?;

        let jobs = self.store.insert_bulk(jobs).await?;
        log_queue_operation(events::JOB_ENQUEUED, &self.name, Some(jobs.len() as u64));
        self.wakeup.notify_one();
        Ok(jobs)
    }

    fn prepare(&self, payload: JobPayload, options: JobOptions, now: DateTime<Utc>) -> QueueResult<NewJob> {
        if self.is_closed() {
            return Err(QueueError::Closed {
                queue: self.name.clone(),
            });
        }
        if payload.kind() != self.kind {
            return Err(QueueError::validation(
                &self.name,
                format!("{} payload on the {} queue", payload.kind(), self.kind),
            ));
        }
        payload
            .validate()
            .map_err(|message| QueueError::validation(&self.name, message))?;

        let delay_ms = match options.scheduled_at {
            Some(scheduled_at) if scheduled_at < now => {
                return Err(QueueError::InvalidSchedule { scheduled_at, now });
            }
            Some(scheduled_at) => (scheduled_at - now).num_milliseconds().max(0) as u64,
            None => options.delay_ms.unwrap_or(0),
        };
        let run_at = i64::try_from(delay_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| {
                QueueError::validation(&self.name, format!("delay_ms {delay_ms} out of range"))
            })?;

        let priority = match options.priority {
            Some(priority) if priority < 1 => {
                return Err(QueueError::validation(
                    &self.name,
                    format!("priority {priority} must be a positive integer"),
                ));
            }
            Some(priority) => priority,
            None => default_priority(&payload, 0),
        };

        let max_attempts = match (&options.attempts, &payload) {
            (Some(attempts), _) => *attempts,
            (None, JobPayload::Delivery(delivery)) => delivery.max_retries,
            (None, _) => self.config.attempts,
        };
        if max_attempts == 0 {
            return Err(QueueError::validation(&self.name, "attempts must be at least 1"));
        }

        Ok(NewJob {
            id: JobId::new(),
            queue_name: self.name.clone(),
            payload,
            priority,
            delay_ms,
            max_attempts,
            backoff: options.backoff.unwrap_or_else(|| self.config.backoff.clone()),
            created_at: now,
            run_at,
        })
    }

    /// Priority for the next attempt of `job`
    ///
    /// Jobs still on their payload-derived default are re-prioritised with the
    /// attempts made so far; explicit producer priorities are kept.
    pub fn retry_priority(&self, job: &Job) -> i32 {
        let previous_default = default_priority(&job.payload, job.attempts_made.saturating_sub(1));
        if job.priority == previous_default {
            default_priority(&job.payload, job.attempts_made)
        } else {
            job.priority
        }
    }

    pub async fn job_counts(&self) -> QueueResult<JobCounts> {
        Ok(self.store.counts(&self.name).await?)
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self
            .store
            .get(id)
            .await?
            .filter(|job| job.queue_name == self.name))
    }

    pub async fn list(&self, state: JobState, limit: i64) -> QueueResult<Vec<Job>> {
        Ok(self.store.list(&self.name, state, limit).await?)
    }

    /// Remove a waiting, delayed or finished job; active jobs are refused
    pub async fn remove(&self, id: JobId) -> QueueResult<bool> {
        if self.get_job(id).await?.is_none() {
            return Ok(false);
        }
        match self.store.remove(id).await {
            Ok(removed) => {
                if removed {
                    log_job_operation(events::JOB_REMOVED, &self.name, &id.to_string(), 0, None);
                }
                Ok(removed)
            }
            Err(StoreError::JobActive { job_id }) => Err(QueueError::JobActive { job_id }),
            Err(error) => Err(error.into()),
        }
    }

    /// Stop new activations; active jobs run to completion
    pub async fn pause(&self) -> QueueResult<()> {
        self.store.set_paused(&self.name, true).await?;
        log_queue_operation(events::QUEUE_PAUSED, &self.name, None);
        Ok(())
    }

    pub async fn resume(&self) -> QueueResult<()> {
        self.store.set_paused(&self.name, false).await?;
        log_queue_operation(events::QUEUE_RESUMED, &self.name, None);
        self.wakeup.notify_one();
        Ok(())
    }

    pub async fn is_paused(&self) -> QueueResult<bool> {
        Ok(self.store.is_paused(&self.name).await?)
    }

    /// Remove every waiting and delayed job
    pub async fn drain(&self) -> QueueResult<u64> {
        let removed = self.store.drain(&self.name).await?;
        log_queue_operation(events::QUEUE_DRAINED, &self.name, Some(removed));
        Ok(removed)
    }

    /// Remove jobs in terminal `state` that finished before `older_than`
    pub async fn clean(&self, older_than: DateTime<Utc>, state: JobState) -> QueueResult<u64> {
        let removed = self.store.clean(&self.name, older_than, state).await?;
        if removed > 0 {
            log_queue_operation(events::QUEUE_CLEANED, &self.name, Some(removed));
        }
        Ok(removed)
    }

    /// Move a failed job back to waiting with a fresh attempt budget
    pub async fn retry_job(&self, id: JobId) -> QueueResult<Job> {
        let job = self.store.retry_failed(id).await?;
        log_job_operation(events::JOB_ENQUEUED, &self.name, &id.to_string(), 0, Some("retry"));
        self.wakeup.notify_one();
        Ok(job)
    }

    /// Apply the `remove_on_complete` / `remove_on_fail` retention limits
    pub async fn apply_retention(&self, state: JobState) -> QueueResult<u64> {
        let keep = match state {
            JobState::Completed => self.config.remove_on_complete,
            JobState::Failed => self.config.remove_on_fail,
            _ => None,
        };
        let Some(keep) = keep else {
            return Ok(0);
        };
        let trimmed = self.store.trim(&self.name, state, keep).await?;
        if trimmed > 0 {
            debug!(queue = %self.name, state = %state, trimmed, "retention trimmed jobs");
        }
        Ok(trimmed)
    }

    /// Requeue or fail jobs that have been active since before `active_before`
    pub async fn recover_stalled(&self, active_before: DateTime<Utc>) -> QueueResult<StalledRecovery> {
        let recovery = self.store.recover_stalled(&self.name, active_before).await?;
        if recovery.requeued + recovery.failed > 0 {
            warn!(
                queue = %self.name,
                requeued = recovery.requeued,
                failed = recovery.failed,
                "⚠️ {}",
                events::JOB_STALLED
            );
            self.wakeup.notify_one();
        }
        Ok(recovery)
    }

    /// Stop accepting jobs and wake the worker so it can wind down
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(queue = %self.name, "🔒 Queue closed");
            log_queue_operation(events::QUEUE_CLOSED, &self.name, None);
        }
        self.wakeup.notify_waiters();
    }
}
