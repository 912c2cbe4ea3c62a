use std::sync::Arc;

use crate::orchestration::OrchestrationManager;

/// Shared state handed to every handler
#[derive(Clone, Debug)]
pub struct AppState {
    pub manager: Arc<OrchestrationManager>,
}

impl AppState {
    pub fn new(manager: Arc<OrchestrationManager>) -> Self {
        Self { manager }
    }
}
