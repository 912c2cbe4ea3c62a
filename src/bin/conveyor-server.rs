//! # Conveyor Server
//!
//! Loads configuration, connects the job store, starts one worker per queue
//! and serves the control surface until Ctrl-C. Exits non-zero when the store
//! is unreachable at startup.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use conveyor_core::config::{ConfigManager, StoreBackend};
use conveyor_core::logging::init_structured_logging;
use conveyor_core::orchestration::{Collaborators, OrchestrationManager};
use conveyor_core::store::{InMemoryJobStore, JobStore, PgJobStore};
use conveyor_core::web;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config_manager = ConfigManager::load().context("failed to load configuration")?;
    let config = config_manager.config().clone();
    info!(
        environment = %config_manager.environment(),
        backend = ?config.store.backend,
        "🚀 Starting conveyor server"
    );

    let store: Arc<dyn JobStore> = match config.store.backend {
        StoreBackend::Postgres => {
            let store = match PgJobStore::connect(&config.store).await {
                Ok(store) => store,
                Err(e) => {
                    error!(error = %e, "❌ Could not connect to the job store");
                    std::process::exit(1);
                }
            };
            store.migrate().await.context("failed to run migrations")?;
            Arc::new(store)
        }
        StoreBackend::Memory => Arc::new(InMemoryJobStore::new()),
    };

    let manager = Arc::new(OrchestrationManager::new(
        config.clone(),
        store,
        Collaborators::in_memory(),
    )?);

    if let Err(e) = manager.initialize().await {
        error!(error = %e, "❌ Job store unreachable, refusing to start");
        std::process::exit(1);
    }
    manager.start()?;

    if config.web.enabled {
        web::serve(Arc::clone(&manager), &config.web.bind_address, shutdown_signal())
            .await
            .context("control surface failed")?;
    } else {
        shutdown_signal().await;
    }

    if !manager.shutdown(SHUTDOWN_TIMEOUT).await {
        error!("⚠️ Shutdown timed out with jobs still in flight");
    }
    info!("👋 Conveyor server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("🛑 Shutdown signal received");
}
