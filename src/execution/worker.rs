//! # Worker
//!
//! One worker serves one [`Queue`]. Its dispatch loop waits for a free
//! concurrency slot, then for the queue's rate limiter, then claims the next
//! job from the store and runs the processor on a spawned task bounded by the
//! queue's execution timeout. The outcome is written back to the store:
//!
//! | outcome | retryable | attempts left | store transition |
//! | --- | --- | --- | --- |
//! | `Ok(value)` | - | - | `active → completed` |
//! | `Err(e)` | yes | yes | `active → delayed` after backoff, re-prioritised |
//! | `Err(e)` | yes | no | `active → failed` |
//! | `Err(e)` | no | - | `active → failed` |
//!
//! Jobs that stay `active` longer than `timeout + stall_grace` (a crashed
//! process, a lost task) are swept back to `waiting` periodically.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::errors::ExecutionError;
use super::progress::ProgressReporter;
use crate::config::WorkerConfig;
use crate::constants::events;
use crate::logging::{log_error, log_job_operation};
use crate::models::Job;
use crate::processors::JobProcessor;
use crate::queue::Queue;
use crate::state_machine::JobState;

/// Point-in-time counters of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub queue: String,
    pub running: bool,
    pub concurrency: usize,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    store_errors: AtomicU64,
}

#[derive(Debug)]
struct WorkerInner {
    queue: Arc<Queue>,
    processor: Arc<dyn JobProcessor>,
    config: WorkerConfig,
    concurrency: usize,
    slots: Arc<Semaphore>,
    running: AtomicBool,
    shutdown: Notify,
    counters: Counters,
}

#[derive(Debug)]
pub struct Worker {
    inner: Arc<WorkerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(queue: Arc<Queue>, processor: Arc<dyn JobProcessor>, config: WorkerConfig) -> Self {
        let concurrency = queue.config().concurrency.max(1);
        Self {
            inner: Arc::new(WorkerInner {
                queue,
                processor,
                config,
                concurrency,
                slots: Arc::new(Semaphore::new(concurrency)),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
                counters: Counters::default(),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.inner.queue
    }

    /// Spawn the dispatch loop; a second call is a no-op
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            queue = %self.inner.queue.name(),
            concurrency = self.inner.concurrency,
            "🚀 Starting worker"
        );
        let inner = Arc::clone(&self.inner);
        *self.handle.lock() = Some(tokio::spawn(async move { inner.run().await }));
    }

    /// Whether the dispatch loop is running
    pub fn is_alive(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
            && self
                .handle
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stats(&self) -> WorkerStats {
        let counters = &self.inner.counters;
        WorkerStats {
            queue: self.inner.queue.name().to_string(),
            running: self.is_alive(),
            concurrency: self.inner.concurrency,
            in_flight: counters.in_flight.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            retried: counters.retried.load(Ordering::SeqCst),
            store_errors: counters.store_errors.load(Ordering::SeqCst),
        }
    }

    /// Stop claiming and wait up to `timeout` for in-flight jobs
    ///
    /// Returns `true` when every in-flight job finished in time. Jobs still
    /// running afterwards keep their `active` state and are recovered by the
    /// stalled-job sweep of the next worker that serves the queue.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        let handle = self.handle.lock().take();

        if !was_running && handle.is_none() {
            return true;
        }
        info!(queue = %self.inner.queue.name(), "🛑 Stopping worker");

        let deadline = tokio::time::Instant::now() + timeout;
        if let Some(handle) = handle {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(queue = %self.inner.queue.name(), error = %e, "dispatch loop ended abnormally"),
                Err(_) => {
                    warn!(queue = %self.inner.queue.name(), "dispatch loop did not stop in time");
                    return false;
                }
            }
        }

        let drained = tokio::time::timeout_at(
            deadline,
            self.inner.slots.acquire_many(self.inner.concurrency as u32),
        )
        .await;
        match drained {
            Ok(Ok(_permits)) => {
                info!(queue = %self.inner.queue.name(), "✅ Worker stopped");
                true
            }
            _ => {
                warn!(
                    queue = %self.inner.queue.name(),
                    in_flight = self.inner.counters.in_flight.load(Ordering::SeqCst),
                    "in-flight jobs still running at shutdown deadline"
                );
                false
            }
        }
    }
}

impl WorkerInner {
    fn should_continue(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.queue.is_closed()
    }

    async fn run(self: Arc<Self>) {
        let mut last_sweep: Option<Instant> = None;

        while self.should_continue() {
            if last_sweep.map_or(true, |at| at.elapsed() >= self.config.stall_check_interval()) {
                self.sweep_stalled().await;
                last_sweep = Some(Instant::now());
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.shutdown.notified() => break,
            };

            if let Some(limiter) = self.queue.rate_limiter() {
                tokio::select! {
                    _ = limiter.acquire() => {}
                    _ = self.shutdown.notified() => break,
                }
            }
            if !self.should_continue() {
                self.release_rate_slot();
                break;
            }

            match self.queue.store().claim_next(self.queue.name(), Utc::now()).await {
                Ok(Some(job)) => {
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move { inner.execute(job, permit).await });
                }
                Ok(None) => {
                    self.release_rate_slot();
                    drop(permit);
                    if !self.idle().await {
                        break;
                    }
                }
                Err(error) => {
                    self.release_rate_slot();
                    drop(permit);
                    self.counters.store_errors.fetch_add(1, Ordering::SeqCst);
                    log_error("worker", "claim_next", &error.to_string(), Some(self.queue.name()));
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!(queue = %self.queue.name(), "dispatch loop exited");
    }

    /// Wait for new work or the poll interval; `false` on shutdown
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval()) => true,
            _ = self.queue.notified() => true,
            _ = self.shutdown.notified() => false,
        }
    }

    fn release_rate_slot(&self) {
        if let Some(limiter) = self.queue.rate_limiter() {
            limiter.release_unused();
        }
    }

    async fn sweep_stalled(&self) {
        let threshold = self.queue.timeout() + self.config.stall_grace();
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return;
        };
        let active_before = Utc::now() - threshold;
        if let Err(error) = self.queue.recover_stalled(active_before).await {
            self.counters.store_errors.fetch_add(1, Ordering::SeqCst);
            log_error("worker", "recover_stalled", &error.to_string(), Some(self.queue.name()));
        }
    }

    async fn execute(self: Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        log_job_operation(
            events::JOB_CLAIMED,
            self.queue.name(),
            &job.id.to_string(),
            job.attempts_made,
            None,
        );

        let result = self.run_processor(&job).await;
        match result {
            Ok(value) => self.complete(&job, value, started).await,
            Err(error) => self.handle_failure(&job, error).await,
        }

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
    }

    /// Run the processor on its own task so a timeout cancels it and a panic
    /// is contained
    async fn run_processor(&self, job: &Job) -> Result<serde_json::Value, ExecutionError> {
        let timeout = self.queue.timeout();
        let processor = Arc::clone(&self.processor);
        let reporter = ProgressReporter::new(Arc::clone(self.queue.store()), job.id);
        let task_job = job.clone();
        let mut task = tokio::spawn(async move { processor.process(&task_job, &reporter).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ExecutionError::transient(format!(
                "processor aborted: {join_error}"
            ))),
            Err(_) => {
                task.abort();
                Err(ExecutionError::Timeout {
                    timeout_ms: timeout.as_millis().min(u64::MAX as u128) as u64,
                })
            }
        }
    }

    async fn complete(&self, job: &Job, value: serde_json::Value, started: Instant) {
        match self.queue.store().complete(job.id, value).await {
            Ok(_) => {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                log_job_operation(
                    events::JOB_COMPLETED,
                    self.queue.name(),
                    &job.id.to_string(),
                    job.attempts_made,
                    Some(&format!("duration_ms={}", started.elapsed().as_millis())),
                );
                self.trim(JobState::Completed).await;
            }
            Err(error) => {
                self.counters.store_errors.fetch_add(1, Ordering::SeqCst);
                log_error("worker", "complete", &error.to_string(), Some(&job.id.to_string()));
            }
        }
    }

    async fn handle_failure(&self, job: &Job, error: ExecutionError) {
        let reason = error.to_string();

        if error.is_retryable() && job.has_attempts_remaining() {
            let delay = job.backoff.delay_for(job.attempt_index());
            let run_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| Utc::now().checked_add_signed(delay))
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);
            let priority = self.queue.retry_priority(job);

            match self
                .queue
                .store()
                .schedule_retry(job.id, run_at, priority, &reason)
                .await
            {
                Ok(_) => {
                    self.counters.retried.fetch_add(1, Ordering::SeqCst);
                    log_job_operation(
                        events::JOB_RETRY_SCHEDULED,
                        self.queue.name(),
                        &job.id.to_string(),
                        job.attempts_made,
                        Some(&format!(
                            "delay_ms={} priority={priority} error={reason}",
                            delay.as_millis()
                        )),
                    );
                }
                Err(store_error) => {
                    self.counters.store_errors.fetch_add(1, Ordering::SeqCst);
                    log_error("worker", "schedule_retry", &store_error.to_string(), Some(&reason));
                }
            }
            return;
        }

        match self.queue.store().fail(job.id, &reason, error.metadata()).await {
            Ok(_) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    queue = %self.queue.name(),
                    job_id = %job.id,
                    attempts_made = job.attempts_made,
                    max_attempts = job.max_attempts,
                    category = error.category(),
                    reason = %reason,
                    "❌ {}",
                    events::JOB_FAILED
                );
                self.trim(JobState::Failed).await;
            }
            Err(store_error) => {
                self.counters.store_errors.fetch_add(1, Ordering::SeqCst);
                log_error("worker", "fail", &store_error.to_string(), Some(&reason));
            }
        }
    }

    async fn trim(&self, state: JobState) {
        if let Err(error) = self.queue.apply_retention(state).await {
            log_error("worker", "apply_retention", &error.to_string(), Some(self.queue.name()));
        }
    }
}
