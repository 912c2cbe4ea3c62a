//! In-process [`JobStore`] backed by a mutex-guarded map.
//!
//! Not durable; used by tests and local development. A single lock guards all
//! job records so claims are trivially atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{JobStore, StalledRecovery, StoreError, StoreResult, STALLED_FAILURE_REASON};
use crate::models::{Job, JobCounts, JobId, NewJob};
use crate::state_machine::{JobEvent, JobState};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    next_sequence: i64,
}

#[derive(Debug)]
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
    paused: DashMap<String, bool>,
    available: AtomicBool,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            paused: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every operation fails with [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("in-memory store marked unavailable"))
        }
    }

    fn materialize(job: NewJob, sequence: i64) -> Job {
        let state = job.initial_state();
        Job {
            id: job.id,
            queue_name: job.queue_name,
            payload: job.payload,
            priority: job.priority,
            delay_ms: job.delay_ms,
            attempts_made: 0,
            max_attempts: job.max_attempts,
            backoff: job.backoff,
            state,
            progress: 0,
            created_at: job.created_at,
            run_at: job.run_at,
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            failure_metadata: None,
            return_value: None,
            sequence,
        }
    }

    /// Apply `event` to the job under the lock, then let `update` mutate it
    fn transition<F>(&self, id: JobId, event: JobEvent, update: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job),
    {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound { job_id: id })?;
        let next = job
            .state
            .transition(event)
            .map_err(|source| StoreError::InvalidTransition { job_id: id, source })?;
        job.state = next;
        update(job);
        Ok(job.clone())
    }

    fn remove_where<F>(&self, predicate: F) -> u64
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| !predicate(job));
        (before - state.jobs.len()) as u64
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_available()
    }

    async fn insert(&self, job: NewJob) -> StoreResult<Job> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        state.next_sequence += 1;
        let job = Self::materialize(job, state.next_sequence);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn insert_bulk(&self, jobs: Vec<NewJob>) -> StoreResult<Vec<Job>> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let mut inserted = Vec::with_capacity(jobs.len());
        for job in jobs {
            state.next_sequence += 1;
            let job = Self::materialize(job, state.next_sequence);
            state.jobs.insert(job.id, job.clone());
            inserted.push(job);
        }
        Ok(inserted)
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> StoreResult<Option<Job>> {
        self.ensure_available()?;
        if self.paused.get(queue).map(|p| *p).unwrap_or(false) {
            return Ok(None);
        }

        let mut state = self.state.lock();
        let next_id = state
            .jobs
            .values()
            .filter(|job| {
                job.queue_name == queue
                    && job.state.is_pending()
                    && job.run_at <= now
                    && job.has_attempts_remaining()
            })
            .min_by_key(|job| (job.priority, job.sequence))
            .map(|job| job.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = job
            .state
            .transition(JobEvent::Claim)
            .map_err(|source| StoreError::InvalidTransition { job_id: id, source })?;
        job.attempts_made += 1;
        job.processed_at = Some(now);
        job.progress = 0;
        Ok(Some(job.clone()))
    }

    async fn update_progress(&self, id: JobId, progress: u8) -> StoreResult<()> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound { job_id: id })?;
        if job.state != JobState::Active {
            return Err(StoreError::invalid_transition(
                id,
                job.state,
                JobEvent::Complete,
            ));
        }
        job.progress = progress.min(100);
        Ok(())
    }

    async fn complete(&self, id: JobId, return_value: serde_json::Value) -> StoreResult<Job> {
        self.transition(id, JobEvent::Complete, |job| {
            job.progress = 100;
            job.finished_at = Some(Utc::now());
            job.return_value = Some(return_value);
            job.failed_reason = None;
        })
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        run_at: DateTime<Utc>,
        priority: i32,
        reason: &str,
    ) -> StoreResult<Job> {
        self.transition(id, JobEvent::Retry, |job| {
            job.run_at = run_at;
            job.priority = priority;
            job.failed_reason = Some(reason.to_string());
        })
    }

    async fn fail(
        &self,
        id: JobId,
        reason: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<Job> {
        self.transition(id, JobEvent::Fail, |job| {
            job.finished_at = Some(Utc::now());
            job.failed_reason = Some(reason.to_string());
            job.failure_metadata = metadata;
        })
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        self.ensure_available()?;
        Ok(self.state.lock().jobs.get(&id).cloned())
    }

    async fn list(&self, queue: &str, state: JobState, limit: i64) -> StoreResult<Vec<Job>> {
        self.ensure_available()?;
        let guard = self.state.lock();
        let mut jobs: Vec<Job> = guard
            .jobs
            .values()
            .filter(|job| job.queue_name == queue && job.state == state)
            .cloned()
            .collect();
        if state.is_terminal() {
            jobs.sort_by(|a, b| b.finished_at.cmp(&a.finished_at).then(b.sequence.cmp(&a.sequence)));
        } else {
            jobs.sort_by_key(|job| (job.priority, job.sequence));
        }
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn counts(&self, queue: &str) -> StoreResult<JobCounts> {
        self.ensure_available()?;
        let guard = self.state.lock();
        let mut counts = JobCounts::default();
        for job in guard.jobs.values().filter(|job| job.queue_name == queue) {
            counts.increment(job.state);
        }
        Ok(counts)
    }

    async fn remove(&self, id: JobId) -> StoreResult<bool> {
        self.ensure_available()?;
        let mut state = self.state.lock();
        match state.jobs.get(&id) {
            None => Ok(false),
            Some(job) if job.state == JobState::Active => {
                Err(StoreError::JobActive { job_id: id })
            }
            Some(_) => Ok(state.jobs.remove(&id).is_some()),
        }
    }

    async fn drain(&self, queue: &str) -> StoreResult<u64> {
        self.ensure_available()?;
        Ok(self.remove_where(|job| job.queue_name == queue && job.state.is_pending()))
    }

    async fn clean(
        &self,
        queue: &str,
        older_than: DateTime<Utc>,
        state: JobState,
    ) -> StoreResult<u64> {
        self.ensure_available()?;
        if !state.is_terminal() {
            return Ok(0);
        }
        Ok(self.remove_where(|job| {
            job.queue_name == queue
                && job.state == state
                && job.finished_at.is_some_and(|finished| finished < older_than)
        }))
    }

    async fn trim(&self, queue: &str, state: JobState, keep: u64) -> StoreResult<u64> {
        self.ensure_available()?;
        if !state.is_terminal() {
            return Ok(0);
        }
        let mut guard = self.state.lock();
        let mut finished: Vec<(Option<DateTime<Utc>>, i64, JobId)> = guard
            .jobs
            .values()
            .filter(|job| job.queue_name == queue && job.state == state)
            .map(|job| (job.finished_at, job.sequence, job.id))
            .collect();
        // Newest first; everything past `keep` goes
        finished.sort_by(|a, b| b.cmp(a));
        let mut removed = 0;
        for (_, _, id) in finished.into_iter().skip(keep as usize) {
            if guard.jobs.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn retry_failed(&self, id: JobId) -> StoreResult<Job> {
        self.transition(id, JobEvent::RetryFailed, |job| {
            job.attempts_made = 0;
            job.progress = 0;
            job.run_at = Utc::now();
            job.processed_at = None;
            job.finished_at = None;
            job.failed_reason = None;
            job.failure_metadata = None;
        })
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        active_before: DateTime<Utc>,
    ) -> StoreResult<StalledRecovery> {
        self.ensure_available()?;
        let mut recovery = StalledRecovery::default();
        let now = Utc::now();
        let mut state = self.state.lock();
        for job in state.jobs.values_mut().filter(|job| {
            job.queue_name == queue
                && job.state == JobState::Active
                && job.processed_at.is_some_and(|started| started < active_before)
        }) {
            if job.has_attempts_remaining() {
                job.state = JobState::Waiting;
                job.run_at = now;
                recovery.requeued += 1;
            } else {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.failed_reason = Some(STALLED_FAILURE_REASON.to_string());
                recovery.failed += 1;
            }
        }
        Ok(recovery)
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> StoreResult<()> {
        self.ensure_available()?;
        self.paused.insert(queue.to_string(), paused);
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> StoreResult<bool> {
        self.ensure_available()?;
        Ok(self.paused.get(queue).map(|p| *p).unwrap_or(false))
    }
}
