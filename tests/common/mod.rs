//! Shared setup for the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use conveyor_core::config::{ConveyorConfig, StoreBackend, WorkerConfig};
use conveyor_core::models::{Job, JobId, JobKind};
use conveyor_core::orchestration::{Collaborators, OrchestrationManager};
use conveyor_core::services::{HeuristicImageTagger, InMemoryStorage, LoggingNotificationSender};
use conveyor_core::state_machine::JobState;
use conveyor_core::store::InMemoryJobStore;

/// An in-memory engine with fast polling and handles on its collaborators
pub struct TestEngine {
    pub store: Arc<InMemoryJobStore>,
    pub storage: Arc<InMemoryStorage>,
    pub notifications: Arc<LoggingNotificationSender>,
    pub manager: Arc<OrchestrationManager>,
}

pub fn fast_config() -> ConveyorConfig {
    let mut config = ConveyorConfig::default();
    config.store.backend = StoreBackend::Memory;
    config.web.enabled = false;
    config.worker = WorkerConfig {
        poll_interval_ms: 5,
        stall_grace_ms: 5_000,
        stall_check_interval_ms: 60_000,
    };
    config
}

pub fn engine(config: ConveyorConfig) -> TestEngine {
    let store = Arc::new(InMemoryJobStore::new());
    let storage = Arc::new(InMemoryStorage::new("integration"));
    let notifications = Arc::new(LoggingNotificationSender::new());
    let collaborators = Collaborators {
        storage: storage.clone(),
        notifications: notifications.clone(),
        tagger: Arc::new(HeuristicImageTagger::new()),
    };
    let manager = Arc::new(
        OrchestrationManager::new(config, store.clone(), collaborators)
            .expect("test config is valid"),
    );
    TestEngine {
        store,
        storage,
        notifications,
        manager,
    }
}

impl TestEngine {
    pub async fn start(&self) {
        self.manager.initialize().await.expect("in-memory store is reachable");
        self.manager.start().expect("manager is initialized");
    }

    /// Poll until the job reaches `state`, panicking after `within`
    pub async fn wait_for(&self, kind: JobKind, id: JobId, state: JobState, within: Duration) -> Job {
        self.wait_until(kind, id, within, |job| job.state == state).await
    }

    /// Poll until `done` holds for the job, panicking after `within`
    pub async fn wait_until<F>(&self, kind: JobKind, id: JobId, within: Duration, done: F) -> Job
    where
        F: Fn(&Job) -> bool,
    {
        let queue = self.manager.queue(kind);
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let job = queue
                .get_job(id)
                .await
                .expect("store is reachable")
                .expect("job exists");
            if done(&job) {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "job {id} still {} after {} attempts and {within:?}",
                    job.state, job.attempts_made
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A solid-colour PNG
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([90, 140, 200]),
    ));
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encodes");
    bytes
}
