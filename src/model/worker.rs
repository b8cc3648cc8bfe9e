use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
        };
        f.pad(s)
    }
}

/// Registry entry for a worker process. Observability only: nothing here
/// feeds scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub hostname: String,
    pub status: WorkerStatus,
    pub tasks_complete: u64,
    pub tasks_failed: u64,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerInfo {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            status: WorkerStatus::Idle,
            tasks_complete: 0,
            tasks_failed: 0,
            last_heartbeat: Utc::now(),
        }
    }

    /// Time since the last heartbeat, clamped at zero for clock skew.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or_default()
    }

    /// A worker is stale once its heartbeat is older than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.heartbeat_age(now) > stale_after
    }

    /// Status to display: offline when stale, regardless of the last report.
    pub fn effective_status(&self, now: DateTime<Utc>, stale_after: Duration) -> WorkerStatus {
        if self.is_stale(now, stale_after) {
            WorkerStatus::Offline
        } else {
            self.status
        }
    }
}
