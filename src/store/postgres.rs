//! # PostgreSQL Job Store
//!
//! Durable [`JobStore`] over a single `conveyor_jobs` table. Claims use
//! `FOR UPDATE SKIP LOCKED` so any number of workers, in any number of
//! processes, can poll the same queue without handing out a job twice.
//! Pause flags live in `conveyor_queues` so they survive restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{JobStore, StalledRecovery, StoreError, StoreResult, STALLED_FAILURE_REASON};
use crate::config::StoreConfig;
use crate::models::{Job, JobCounts, JobId, NewJob};
use crate::state_machine::{JobEvent, JobState};

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const JOB_COLUMNS: &str = "id, sequence, queue_name, payload, priority, delay_ms, attempts_made, \
     max_attempts, backoff, state, progress, created_at, run_at, processed_at, finished_at, \
     failed_reason, failure_metadata, return_value";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    sequence: i64,
    queue_name: String,
    payload: serde_json::Value,
    priority: i32,
    delay_ms: i64,
    attempts_made: i32,
    max_attempts: i32,
    backoff: serde_json::Value,
    state: String,
    progress: i16,
    created_at: DateTime<Utc>,
    run_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    failed_reason: Option<String>,
    failure_metadata: Option<serde_json::Value>,
    return_value: Option<serde_json::Value>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|message| StoreError::Serialization { message })?;

        Ok(Job {
            id: JobId(row.id),
            queue_name: row.queue_name,
            payload: serde_json::from_value(row.payload)?,
            priority: row.priority,
            delay_ms: row.delay_ms.max(0) as u64,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            backoff: serde_json::from_value(row.backoff)?,
            state,
            progress: row.progress.clamp(0, 100) as u8,
            created_at: row.created_at,
            run_at: row.run_at,
            processed_at: row.processed_at,
            finished_at: row.finished_at,
            failed_reason: row.failed_reason,
            failure_metadata: row.failure_metadata,
            return_value: row.return_value,
            sequence: row.sequence,
        })
    }
}

/// Map a sqlx error, separating connectivity loss from query failures
fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::unavailable(format!("{operation}: {error}"))
        }
        other => StoreError::query(operation, other),
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connect using the store section of the configuration
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        info!(
            max_connections = config.max_connections,
            "🔌 Connecting to PostgreSQL job store"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::unavailable(format!("connect: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::query("migrate", e))?;
        info!("✅ Job store schema up to date");
        Ok(())
    }

    async fn insert_one<'e, E>(executor: E, job: &NewJob) -> StoreResult<Job>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            "INSERT INTO conveyor_jobs \
             (id, queue_name, payload, priority, delay_ms, max_attempts, backoff, state, created_at, run_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.id.0)
            .bind(&job.queue_name)
            .bind(serde_json::to_value(&job.payload)?)
            .bind(job.priority)
            .bind(job.delay_ms as i64)
            .bind(job.max_attempts as i32)
            .bind(serde_json::to_value(&job.backoff)?)
            .bind(job.initial_state().as_str())
            .bind(job.created_at)
            .bind(job.run_at)
            .fetch_one(executor)
            .await
            .map_err(db_error("insert job"))?;
        Job::try_from(row)
    }

    /// Explain why a guarded update touched no row
    async fn rejected_transition(&self, id: JobId, event: JobEvent) -> StoreError {
        match self.get(id).await {
            Ok(Some(job)) => StoreError::invalid_transition(id, job.state, event),
            Ok(None) => StoreError::JobNotFound { job_id: id },
            Err(error) => error,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable(format!("ping: {e}")))?;
        Ok(())
    }

    async fn insert(&self, job: NewJob) -> StoreResult<Job> {
        Self::insert_one(&self.pool, &job).await
    }

    async fn insert_bulk(&self, jobs: Vec<NewJob>) -> StoreResult<Vec<Job>> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin bulk insert"))?;
        let mut inserted = Vec::with_capacity(jobs.len());
        for job in &jobs {
            inserted.push(Self::insert_one(&mut *tx, job).await?);
        }
        tx.commit().await.map_err(db_error("commit bulk insert"))?;
        Ok(inserted)
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> StoreResult<Option<Job>> {
        let sql = format!(
            "UPDATE conveyor_jobs \
             SET state = 'active', attempts_made = attempts_made + 1, processed_at = $2, progress = 0 \
             WHERE id = ( \
                 SELECT j.id FROM conveyor_jobs j \
                 WHERE j.queue_name = $1 \
                   AND j.state IN ('waiting', 'delayed') \
                   AND j.run_at <= $2 \
                   AND j.attempts_made < j.max_attempts \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM conveyor_queues q WHERE q.name = $1 AND q.paused \
                   ) \
                 ORDER BY j.priority, j.sequence \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("claim job"))?;

        let job = row.map(Job::try_from).transpose()?;
        if let Some(job) = &job {
            debug!(queue, job_id = %job.id, attempt = job.attempts_made, "claimed job");
        }
        Ok(job)
    }

    async fn update_progress(&self, id: JobId, progress: u8) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE conveyor_jobs SET progress = $2 WHERE id = $1 AND state = 'active'",
        )
        .bind(id.0)
        .bind(progress.min(100) as i16)
        .execute(&self.pool)
        .await
        .map_err(db_error("update progress"))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, JobEvent::Complete).await);
        }
        Ok(())
    }

    async fn complete(&self, id: JobId, return_value: serde_json::Value) -> StoreResult<Job> {
        let sql = format!(
            "UPDATE conveyor_jobs \
             SET state = 'completed', progress = 100, finished_at = NOW(), \
                 return_value = $2, failed_reason = NULL \
             WHERE id = $1 AND state = 'active' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(return_value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("complete job"))?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.rejected_transition(id, JobEvent::Complete).await),
        }
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        run_at: DateTime<Utc>,
        priority: i32,
        reason: &str,
    ) -> StoreResult<Job> {
        let sql = format!(
            "UPDATE conveyor_jobs \
             SET state = 'delayed', run_at = $2, priority = $3, failed_reason = $4 \
             WHERE id = $1 AND state = 'active' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(run_at)
            .bind(priority)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("schedule retry"))?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.rejected_transition(id, JobEvent::Retry).await),
        }
    }

    async fn fail(
        &self,
        id: JobId,
        reason: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<Job> {
        let sql = format!(
            "UPDATE conveyor_jobs \
             SET state = 'failed', finished_at = NOW(), failed_reason = $2, failure_metadata = $3 \
             WHERE id = $1 AND state = 'active' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(reason)
            .bind(metadata)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("fail job"))?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.rejected_transition(id, JobEvent::Fail).await),
        }
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM conveyor_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("get job"))?
            .map(Job::try_from)
            .transpose()
    }

    async fn list(&self, queue: &str, state: JobState, limit: i64) -> StoreResult<Vec<Job>> {
        let order = if state.is_terminal() {
            "finished_at DESC NULLS LAST, sequence DESC"
        } else {
            "priority, sequence"
        };
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM conveyor_jobs \
             WHERE queue_name = $1 AND state = $2 \
             ORDER BY {order} LIMIT $3"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue)
            .bind(state.as_str())
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list jobs"))?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn counts(&self, queue: &str) -> StoreResult<JobCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM conveyor_jobs WHERE queue_name = $1 GROUP BY state",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("count jobs"))?;

        let mut counts = JobCounts::default();
        for (state, count) in rows {
            let state = state
                .parse::<JobState>()
                .map_err(|message| StoreError::Serialization { message })?;
            let count = count.max(0) as u64;
            match state {
                JobState::Waiting => counts.waiting = count,
                JobState::Delayed => counts.delayed = count,
                JobState::Active => counts.active = count,
                JobState::Completed => counts.completed = count,
                JobState::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn remove(&self, id: JobId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM conveyor_jobs WHERE id = $1 AND state <> 'active'")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(db_error("remove job"))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get(id).await? {
            Some(_) => Err(StoreError::JobActive { job_id: id }),
            None => Ok(false),
        }
    }

    async fn drain(&self, queue: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM conveyor_jobs WHERE queue_name = $1 AND state IN ('waiting', 'delayed')",
        )
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(db_error("drain queue"))?;
        Ok(result.rows_affected())
    }

    async fn clean(
        &self,
        queue: &str,
        older_than: DateTime<Utc>,
        state: JobState,
    ) -> StoreResult<u64> {
        if !state.is_terminal() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM conveyor_jobs \
             WHERE queue_name = $1 AND state = $2 AND finished_at < $3",
        )
        .bind(queue)
        .bind(state.as_str())
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(db_error("clean queue"))?;
        Ok(result.rows_affected())
    }

    async fn trim(&self, queue: &str, state: JobState, keep: u64) -> StoreResult<u64> {
        if !state.is_terminal() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM conveyor_jobs WHERE id IN ( \
                 SELECT id FROM conveyor_jobs \
                 WHERE queue_name = $1 AND state = $2 \
                 ORDER BY finished_at DESC NULLS LAST, sequence DESC \
                 OFFSET $3 \
             )",
        )
        .bind(queue)
        .bind(state.as_str())
        .bind(keep.min(i64::MAX as u64) as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error("trim queue"))?;
        Ok(result.rows_affected())
    }

    async fn retry_failed(&self, id: JobId) -> StoreResult<Job> {
        let sql = format!(
            "UPDATE conveyor_jobs \
             SET state = 'waiting', attempts_made = 0, progress = 0, run_at = NOW(), \
                 processed_at = NULL, finished_at = NULL, failed_reason = NULL, \
                 failure_metadata = NULL \
             WHERE id = $1 AND state = 'failed' \
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("retry failed job"))?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.rejected_transition(id, JobEvent::RetryFailed).await),
        }
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        active_before: DateTime<Utc>,
    ) -> StoreResult<StalledRecovery> {
        let mut tx = self.pool.begin().await.map_err(db_error("begin stall sweep"))?;

        let failed = sqlx::query(
            "UPDATE conveyor_jobs \
             SET state = 'failed', finished_at = NOW(), failed_reason = $3 \
             WHERE queue_name = $1 AND state = 'active' AND processed_at < $2 \
               AND attempts_made >= max_attempts",
        )
        .bind(queue)
        .bind(active_before)
        .bind(STALLED_FAILURE_REASON)
        .execute(&mut *tx)
        .await
        .map_err(db_error("fail stalled jobs"))?
        .rows_affected();

        let requeued = sqlx::query(
            "UPDATE conveyor_jobs SET state = 'waiting', run_at = NOW() \
             WHERE queue_name = $1 AND state = 'active' AND processed_at < $2",
        )
        .bind(queue)
        .bind(active_before)
        .execute(&mut *tx)
        .await
        .map_err(db_error("requeue stalled jobs"))?
        .rows_affected();

        tx.commit().await.map_err(db_error("commit stall sweep"))?;
        Ok(StalledRecovery { requeued, failed })
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO conveyor_queues (name, paused, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (name) DO UPDATE SET paused = EXCLUDED.paused, updated_at = NOW()",
        )
        .bind(queue)
        .bind(paused)
        .execute(&self.pool)
        .await
        .map_err(db_error("set paused"))?;
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> StoreResult<bool> {
        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM conveyor_queues WHERE name = $1")
                .bind(queue)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("read paused flag"))?;
        Ok(paused.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    //! These run against a live database (`DATABASE_URL`), so they are ignored
    //! by default: `cargo test -- --ignored`.

    use super::*;
    use crate::models::{JobPayload, NotificationJob};
    use crate::queue::BackoffPolicy;
    use serde_json::json;

    fn new_job(queue: &str, priority: i32) -> NewJob {
        let now = Utc::now();
        NewJob {
            id: JobId::new(),
            queue_name: queue.to_string(),
            payload: JobPayload::Notification(NotificationJob {
                to: "client@example.com".to_string(),
                template: "invoice-sent".to_string(),
                variables: Default::default(),
                attachments: vec![],
            }),
            priority,
            delay_ms: 0,
            max_attempts: 1,
            backoff: BackoffPolicy::exponential(1_000),
            created_at: now,
            run_at: now,
        }
    }

    #[sqlx::test(migrator = "crate::store::postgres::MIGRATOR")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_claim_order_and_completion(pool: PgPool) {
        let store = PgJobStore::from_pool(pool);
        let low = store.insert(new_job("pg", 5)).await.unwrap();
        let urgent = store.insert(new_job("pg", 1)).await.unwrap();

        let claimed = store.claim_next("pg", Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, urgent.id);
        assert_eq!(claimed.attempts_made, 1);

        let done = store.complete(claimed.id, json!({"ok": true})).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);

        let next = store.claim_next("pg", Utc::now()).await.unwrap().unwrap();
        assert_eq!(next.id, low.id);
    }

    #[sqlx::test(migrator = "crate::store::postgres::MIGRATOR")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pause_flag_blocks_claims(pool: PgPool) {
        let store = PgJobStore::from_pool(pool);
        store.insert(new_job("pg", 1)).await.unwrap();
        store.set_paused("pg", true).await.unwrap();

        assert!(store.is_paused("pg").await.unwrap());
        assert!(store.claim_next("pg", Utc::now()).await.unwrap().is_none());
        assert_eq!(store.counts("pg").await.unwrap().waiting, 1);
    }

    #[sqlx::test(migrator = "crate::store::postgres::MIGRATOR")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_invalid_transition_is_reported(pool: PgPool) {
        let store = PgJobStore::from_pool(pool);
        let job = store.insert(new_job("pg", 1)).await.unwrap();

        let err = store.complete(job.id, json!(null)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let err = store.complete(JobId::new(), json!(null)).await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound { .. }));
    }
}
