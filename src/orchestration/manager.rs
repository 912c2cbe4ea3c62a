use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::health::{HealthChecks, HealthReport};
use crate::config::ConveyorConfig;
use crate::error::{ConveyorError, Result};
use crate::execution::{Worker, WorkerStats};
use crate::logging::log_error;
use crate::models::{Job, JobCounts, JobId, JobKind, JobOptions, JobPayload};
use crate::processors::ProcessorSet;
use crate::queue::{Queue, QueueResult};
use crate::services::{
    HeuristicImageTagger, ImageTagger, InMemoryStorage, LoggingNotificationSender,
    NotificationSender, StorageClient,
};
use crate::state_machine::JobState;
use crate::store::JobStore;

/// Failed jobs fetched per page by [`OrchestrationManager::retry_all_failed`]
const RETRY_PAGE_SIZE: i64 = 500;

/// External services the processors depend on
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageClient>,
    pub notifications: Arc<dyn NotificationSender>,
    pub tagger: Arc<dyn ImageTagger>,
}

impl Collaborators {
    /// In-process collaborators for local runs and tests
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::new("conveyor")),
            notifications: Arc::new(LoggingNotificationSender::new()),
            tagger: Arc::new(HeuristicImageTagger::new()),
        }
    }
}

/// Per-queue outcome of a bulk control operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    /// Queue name to error message
    pub failed: BTreeMap<String, String>,
    /// Jobs removed, for operations that remove jobs
    pub affected: u64,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    pub retried: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub counts: Option<JobCounts>,
    pub paused: Option<bool>,
    pub worker: WorkerStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub queues: BTreeMap<String, QueueStats>,
    pub totals: JobCounts,
}

#[derive(Debug)]
struct QueueRuntime {
    queue: Arc<Queue>,
    worker: Worker,
}

/// Owns every queue/worker pair and exposes engine-wide control
#[derive(Debug)]
pub struct OrchestrationManager {
    config: ConveyorConfig,
    store: Arc<dyn JobStore>,
    runtimes: BTreeMap<JobKind, QueueRuntime>,
    initialized: AtomicBool,
}

impl OrchestrationManager {
    pub fn new(
        config: ConveyorConfig,
        store: Arc<dyn JobStore>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let processors = ProcessorSet::new(&collaborators, &config.delivery).map_err(|e| {
            ConveyorError::orchestration(format!("failed to build delivery client: {e}"))
        })?;

        let runtimes = JobKind::ALL
            .into_iter()
            .map(|kind| {
                let queue = Arc::new(Queue::new(
                    kind,
                    config.queues.get(kind).clone(),
                    Arc::clone(&store),
                ));
                let worker = Worker::new(
                    Arc::clone(&queue),
                    processors.for_kind(kind),
                    config.worker.clone(),
                );
                (kind, QueueRuntime { queue, worker })
            })
            .collect();

        Ok(Self {
            config,
            store,
            runtimes,
            initialized: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Verify the store is reachable; nothing may start until this succeeds
    pub async fn initialize(&self) -> Result<()> {
        info!(backend = self.store.backend_name(), "🚀 Initializing orchestration manager");
        if let Err(e) = self.store.ping().await {
            error!(backend = self.store.backend_name(), error = %e, "❌ Job store unreachable");
            return Err(e.into());
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!("✅ Job store reachable, {} queues ready", self.runtimes.len());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Start every worker
    pub fn start(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(ConveyorError::orchestration(
                "manager must be initialized before starting workers",
            ));
        }
        for runtime in self.runtimes.values() {
            runtime.worker.start();
        }
        info!("✅ All workers started");
        Ok(())
    }

    pub fn queue(&self, kind: JobKind) -> &Arc<Queue> {
        // Every kind gets a runtime in `new`
        &self.runtimes[&kind].queue
    }

    pub fn worker(&self, kind: JobKind) -> &Worker {
        &self.runtimes[&kind].worker
    }

    pub fn queues(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.runtimes.values().map(|runtime| &runtime.queue)
    }

    /// Enqueue on the queue matching the payload's kind
    pub async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> QueueResult<Job> {
        self.queue(payload.kind()).enqueue(payload, options).await
    }

    pub async fn health_check(&self) -> HealthReport {
        let mut checks = HealthChecks {
            store: self.store.ping().await.is_ok(),
            ..HealthChecks::default()
        };

        for runtime in self.runtimes.values() {
            let name = runtime.queue.name().to_string();
            let reachable = !runtime.queue.is_closed() && runtime.queue.job_counts().await.is_ok();
            checks.per_queue_reachable.insert(name.clone(), reachable);
            checks
                .per_worker_alive
                .insert(name, runtime.worker.is_alive());
        }

        let report = HealthReport::from(checks);
        if report.status != super::HealthStatus::Healthy {
            warn!(status = %report.status, "⚠️ Engine health check not healthy");
        }
        report
    }

    pub async fn stats(&self) -> EngineStats {
        let mut queues = BTreeMap::new();
        let mut totals = JobCounts::default();

        for runtime in self.runtimes.values() {
            let mut error = None;
            let counts = match runtime.queue.job_counts().await {
                Ok(counts) => {
                    totals += counts;
                    Some(counts)
                }
                Err(e) => {
                    error = Some(e.to_string());
                    None
                }
            };
            let paused = runtime.queue.is_paused().await.ok();
            queues.insert(
                runtime.queue.name().to_string(),
                QueueStats {
                    counts,
                    paused,
                    worker: runtime.worker.stats(),
                    error,
                },
            );
        }

        EngineStats { queues, totals }
    }

    pub async fn pause_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for queue in self.queues() {
            let result = queue.pause().await;
            record(&mut outcome, queue, "pause", result.map(|()| 0));
        }
        outcome
    }

    pub async fn resume_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for queue in self.queues() {
            let result = queue.resume().await;
            record(&mut outcome, queue, "resume", result.map(|()| 0));
        }
        outcome
    }

    pub async fn drain_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for queue in self.queues() {
            let result = queue.drain().await;
            record(&mut outcome, queue, "drain", result);
        }
        outcome
    }

    /// Remove completed and failed jobs that finished more than `days` ago
    ///
    /// A window reaching past the earliest representable time removes nothing.
    pub async fn clean_older_than(&self, days: u32) -> BulkOutcome {
        let cutoff = ChronoDuration::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        let mut outcome = BulkOutcome::default();
        for queue in self.queues() {
            let mut result = Ok(0);
            if let Some(cutoff) = cutoff {
                for state in [JobState::Completed, JobState::Failed] {
                    result = match (result, queue.clean(cutoff, state).await) {
                        (Ok(total), Ok(removed)) => Ok(total + removed),
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    };
                }
            }
            record(&mut outcome, queue, "clean", result);
        }
        info!(days, removed = outcome.affected, "🧹 Cleaned finished jobs");
        outcome
    }

    /// Move every failed job on every queue back to waiting
    ///
    /// Each job is attempted once; one whose retry fails stays failed and is
    /// counted once in [`RetryReport::failed`].
    pub async fn retry_all_failed(&self) -> RetryReport {
        let mut report = RetryReport::default();
        for queue in self.queues() {
            let mut attempted: HashSet<JobId> = HashSet::new();
            loop {
                let page = match queue.list(JobState::Failed, RETRY_PAGE_SIZE).await {
                    Ok(page) => page,
                    Err(e) => {
                        let message = e.to_string();
                        log_error("orchestration", "retry_all_failed", &message, Some(queue.name()));
                        break;
                    }
                };

                let fresh: Vec<Job> = page
                    .into_iter()
                    .filter(|job| attempted.insert(job.id))
                    .collect();
                // Only jobs whose retry already failed are left
                if fresh.is_empty() {
                    break;
                }

                for job in fresh {
                    match queue.retry_job(job.id).await {
                        Ok(_) => report.retried += 1,
                        Err(e) => {
                            report.failed += 1;
                            warn!(queue = %queue.name(), job_id = %job.id, error = %e, "retry failed");
                        }
                    }
                }
            }
        }
        info!(retried = report.retried, failed = report.failed, "🔁 Retried failed jobs");
        report
    }

    /// Active jobs across every queue, up to `limit` per queue
    pub async fn active_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.jobs_in_state(JobState::Active, limit).await
    }

    /// Failed jobs across every queue, up to `limit` per queue
    pub async fn failed_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.jobs_in_state(JobState::Failed, limit).await
    }

    async fn jobs_in_state(&self, state: JobState, limit: i64) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for queue in self.queues() {
            jobs.extend(queue.list(state, limit).await?);
        }
        Ok(jobs)
    }

    /// Close every queue and wait up to `timeout` for each worker to finish
    /// its in-flight jobs; `false` if any worker ran out of time
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!("🛑 Shutting down orchestration manager");
        for queue in self.queues() {
            queue.close();
        }
        let mut clean = true;
        for runtime in self.runtimes.values() {
            clean &= runtime.worker.shutdown(timeout).await;
        }
        if clean {
            info!("✅ Orchestration manager stopped");
        } else {
            warn!("⚠️ Some in-flight jobs did not finish before shutdown timeout");
        }
        clean
    }
}

fn record(outcome: &mut BulkOutcome, queue: &Queue, operation: &str, result: QueueResult<u64>) {
    match result {
        Ok(affected) => {
            outcome.affected += affected;
            outcome.succeeded.push(queue.name().to_string());
        }
        Err(e) => {
            log_error("orchestration", operation, &e.to_string(), Some(queue.name()));
            outcome.failed.insert(queue.name().to_string(), e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::models::NotificationJob;
    use crate::orchestration::HealthStatus;
    use crate::store::InMemoryJobStore;
    use serde_json::Map;

    fn config() -> ConveyorConfig {
        let mut config = ConveyorConfig::default();
        config.worker = WorkerConfig {
            poll_interval_ms: 5,
            stall_grace_ms: 1_000,
            stall_check_interval_ms: 60_000,
        };
        config
    }

    fn manager() -> (Arc<InMemoryJobStore>, OrchestrationManager) {
        let store = Arc::new(InMemoryJobStore::new());
        let manager =
            OrchestrationManager::new(config(), store.clone(), Collaborators::in_memory()).unwrap();
        (store, manager)
    }

    fn notification(to: &str) -> JobPayload {
        JobPayload::Notification(NotificationJob {
            to: to.to_string(),
            template: "gallery-ready".to_string(),
            variables: Map::new(),
            attachments: vec![],
        })
    }

    /// Claim and fail the next notification job directly through the store
    async fn fail_next(store: &InMemoryJobStore) -> Job {
        let job = store
            .claim_next(JobKind::Notification.queue_name(), Utc::now())
            .await
            .unwrap()
            .unwrap();
        store.fail(job.id, "smtp down", None).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_fails_when_store_unreachable() {
        let (store, manager) = manager();
        store.set_available(false);
        assert!(manager.initialize().await.is_err());
        assert!(manager.start().is_err());
    }

    #[tokio::test]
    async fn test_health_transitions() {
        let (store, manager) = manager();
        manager.initialize().await.unwrap();

        // Store up, workers not started yet
        assert_eq!(manager.health_check().await.status, HealthStatus::Degraded);

        manager.start().unwrap();
        let report = manager.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.checks.per_worker_alive.len(), 5);

        manager.shutdown(Duration::from_secs(1)).await;
        store.set_available(false);
        assert_eq!(manager.health_check().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_enqueue_routes_by_kind() {
        let (_, manager) = manager();
        let job = manager
            .enqueue(notification("ada@example.com"), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(job.queue_name, "notification");

        let stats = manager.stats().await;
        assert_eq!(stats.totals.waiting, 1);
        assert_eq!(stats.queues["notification"].counts.unwrap().waiting, 1);
        assert_eq!(stats.queues["notification"].paused, Some(false));
    }

    #[tokio::test]
    async fn test_pause_resume_drain_all() {
        let (_, manager) = manager();
        for to in ["a@example.com", "b@example.com"] {
            manager.enqueue(notification(to), JobOptions::default()).await.unwrap();
        }

        let paused = manager.pause_all().await;
        assert!(paused.is_complete());
        assert_eq!(paused.succeeded.len(), 5);
        for queue in manager.queues() {
            assert!(queue.is_paused().await.unwrap());
        }

        let drained = manager.drain_all().await;
        assert_eq!(drained.affected, 2);

        manager.resume_all().await;
        assert!(!manager.queue(JobKind::Media).is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_all_failed_requeues_every_failed_job() {
        let (store, manager) = manager();
        for to in ["a@example.com", "b@example.com", "c@example.com"] {
            manager.enqueue(notification(to), JobOptions::default()).await.unwrap();
        }
        for _ in 0..3 {
            fail_next(&store).await;
        }
        assert_eq!(manager.failed_jobs(100).await.unwrap().len(), 3);

        let report = manager.retry_all_failed().await;
        assert_eq!(report, RetryReport { retried: 3, failed: 0 });
        assert!(manager.failed_jobs(100).await.unwrap().is_empty());
        assert_eq!(manager.stats().await.totals.waiting, 3);
    }

    #[tokio::test]
    async fn test_clean_keeps_recent_jobs() {
        let (store, manager) = manager();
        manager
            .enqueue(notification("a@example.com"), JobOptions::default())
            .await
            .unwrap();
        fail_next(&store).await;

        let outcome = manager.clean_older_than(7).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.affected, 0);

        let outcome = manager.clean_older_than(0).await;
        assert_eq!(outcome.affected, 1);
    }

    #[tokio::test]
    async fn test_workers_process_jobs_end_to_end() {
        let (_, manager) = manager();
        manager.initialize().await.unwrap();
        manager.start().unwrap();

        let job = manager
            .enqueue(notification("ada@example.com"), JobOptions::default())
            .await
            .unwrap();

        let queue = manager.queue(JobKind::Notification);
        let mut finished = None;
        for _ in 0..200 {
            let current = queue.get_job(job.id).await.unwrap().unwrap();
            if current.state == JobState::Completed {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let finished = finished.expect("job should complete");
        assert_eq!(finished.progress, 100);
        assert!(finished.return_value.unwrap()["messageId"]
            .as_str()
            .unwrap()
            .starts_with("msg-"));

        assert!(manager.shutdown(Duration::from_secs(1)).await);
        assert_eq!(manager.stats().await.queues["notification"].worker.completed, 1);
    }

    #[tokio::test]
    async fn test_clean_with_huge_window_removes_nothing() {
        let (store, manager) = manager();
        manager
            .enqueue(notification("a@example.com"), JobOptions::default())
            .await
            .unwrap();
        fail_next(&store).await;

        let outcome = manager.clean_older_than(200_000_000).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded.len(), 5);
        assert_eq!(outcome.affected, 0);
        assert_eq!(manager.failed_jobs(10).await.unwrap().len(), 1);

        let outcome = manager.clean_older_than(u32::MAX).await;
        assert_eq!(outcome.affected, 0);
    }

    /// In-memory store whose `retry_failed` rejects one chosen job
    #[derive(Debug, Default)]
    struct StubbornStore {
        inner: InMemoryJobStore,
        stuck: parking_lot::Mutex<Option<JobId>>,
    }

    #[async_trait::async_trait]
    impl JobStore for StubbornStore {
        fn backend_name(&self) -> &'static str {
            "stubborn"
        }
        async fn ping(&self) -> crate::store::StoreResult<()> {
            self.inner.ping().await
        }
        async fn insert(&self, job: crate::models::NewJob) -> crate::store::StoreResult<Job> {
            self.inner.insert(job).await
        }
        async fn insert_bulk(
            &self,
            jobs: Vec<crate::models::NewJob>,
        ) -> crate::store::StoreResult<Vec<Job>> {
            self.inner.insert_bulk(jobs).await
        }
        async fn claim_next(
            &self,
            queue: &str,
            now: chrono::DateTime<Utc>,
        ) -> crate::store::StoreResult<Option<Job>> {
            self.inner.claim_next(queue, now).await
        }
        async fn update_progress(&self, id: JobId, progress: u8) -> crate::store::StoreResult<()> {
            self.inner.update_progress(id, progress).await
        }
        async fn complete(
            &self,
            id: JobId,
            return_value: serde_json::Value,
        ) -> crate::store::StoreResult<Job> {
            self.inner.complete(id, return_value).await
        }
        async fn schedule_retry(
            &self,
            id: JobId,
            run_at: chrono::DateTime<Utc>,
            priority: i32,
            reason: &str,
        ) -> crate::store::StoreResult<Job> {
            self.inner.schedule_retry(id, run_at, priority, reason).await
        }
        async fn fail(
            &self,
            id: JobId,
            reason: &str,
            metadata: Option<serde_json::Value>,
        ) -> crate::store::StoreResult<Job> {
            self.inner.fail(id, reason, metadata).await
        }
        async fn get(&self, id: JobId) -> crate::store::StoreResult<Option<Job>> {
            self.inner.get(id).await
        }
        async fn list(
            &self,
            queue: &str,
            state: JobState,
            limit: i64,
        ) -> crate::store::StoreResult<Vec<Job>> {
            self.inner.list(queue, state, limit).await
        }
        async fn counts(&self, queue: &str) -> crate::store::StoreResult<JobCounts> {
            self.inner.counts(queue).await
        }
        async fn remove(&self, id: JobId) -> crate::store::StoreResult<bool> {
            self.inner.remove(id).await
        }
        async fn drain(&self, queue: &str) -> crate::store::StoreResult<u64> {
            self.inner.drain(queue).await
        }
        async fn clean(
            &self,
            queue: &str,
            older_than: chrono::DateTime<Utc>,
            state: JobState,
        ) -> crate::store::StoreResult<u64> {
            self.inner.clean(queue, older_than, state).await
        }
        async fn trim(&self, queue: &str, state: JobState, keep: u64) -> crate::store::StoreResult<u64> {
            self.inner.trim(queue, state, keep).await
        }
        async fn retry_failed(&self, id: JobId) -> crate::store::StoreResult<Job> {
            if *self.stuck.lock() == Some(id) {
                return Err(crate::store::StoreError::unavailable("row locked"));
            }
            self.inner.retry_failed(id).await
        }
        async fn recover_stalled(
            &self,
            queue: &str,
            active_before: chrono::DateTime<Utc>,
        ) -> crate::store::StoreResult<crate::store::StalledRecovery> {
            self.inner.recover_stalled(queue, active_before).await
        }
        async fn set_paused(&self, queue: &str, paused: bool) -> crate::store::StoreResult<()> {
            self.inner.set_paused(queue, paused).await
        }
        async fn is_paused(&self, queue: &str) -> crate::store::StoreResult<bool> {
            self.inner.is_paused(queue).await
        }
    }

    #[tokio::test]
    async fn test_retry_all_failed_counts_a_stuck_job_once() {
        let store = Arc::new(StubbornStore::default());
        let manager =
            OrchestrationManager::new(config(), store.clone(), Collaborators::in_memory()).unwrap();
        for to in ["a@example.com", "b@example.com"] {
            manager.enqueue(notification(to), JobOptions::default()).await.unwrap();
        }
        let stuck = fail_next(&store.inner).await;
        fail_next(&store.inner).await;
        *store.stuck.lock() = Some(stuck.id);

        let report = manager.retry_all_failed().await;
        assert_eq!(report, RetryReport { retried: 1, failed: 1 });

        let still_failed = manager.failed_jobs(10).await.unwrap();
        assert_eq!(still_failed.len(), 1);
        assert_eq!(still_failed[0].id, stuck.id);
    }
}
