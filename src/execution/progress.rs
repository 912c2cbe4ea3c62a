use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::models::JobId;
use crate::store::JobStore;

/// Handle a processor uses to report `0..=100` progress for its job
///
/// Reporting is best-effort: a store error is logged and never fails the job.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    store: Option<Arc<dyn JobStore>>,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self {
            job_id,
            store: Some(store),
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Reporter that only remembers the last value
    pub fn detached(job_id: JobId) -> Self {
        Self {
            job_id,
            store: None,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn update(&self, progress: u8) {
        let progress = progress.min(100);
        self.last.store(progress, Ordering::SeqCst);

        if let Some(store) = &self.store {
            if let Err(error) = store.update_progress(self.job_id, progress).await {
                warn!(job_id = %self.job_id, progress, error = %error, "progress update failed");
            }
        }
    }

    pub fn last_reported(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}
