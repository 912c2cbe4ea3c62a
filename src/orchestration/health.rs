use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    pub store: bool,
    pub per_queue_reachable: BTreeMap<String, bool>,
    pub per_worker_alive: BTreeMap<String, bool>,
}

impl HealthChecks {
    /// Healthy only when everything is up; unhealthy only when the store is
    /// down and no queue or worker reports healthy; degraded in between
    pub fn status(&self) -> HealthStatus {
        let all_queues = self.per_queue_reachable.values().all(|ok| *ok);
        let all_workers = self.per_worker_alive.values().all(|ok| *ok);
        let any_queue = self.per_queue_reachable.values().any(|ok| *ok);
        let any_worker = self.per_worker_alive.values().any(|ok| *ok);

        if self.store && all_queues && all_workers {
            HealthStatus::Healthy
        } else if !self.store && !any_queue && !any_worker {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

impl From<HealthChecks> for HealthReport {
    fn from(checks: HealthChecks) -> Self {
        Self {
            status: checks.status(),
            checks,
        }
    }
}
