//! Master: submits tasks to the shared queue and keeps the worker registry
//! honest. It never assigns tasks; workers pull.

use crate::config::MasterConfig;
use crate::error::Result;
use crate::model::{Task, WorkerInfo, WorkerStatus};
use crate::queue::{TaskQueue, WorkerRegistry};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A point-in-time view of the cluster.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    /// Registered workers with their status as of now (stale ones offline).
    pub workers: Vec<WorkerInfo>,
    pub pending: usize,
}

impl ClusterStatus {
    pub fn count(&self, status: WorkerStatus) -> usize {
        self.workers.iter().filter(|w| w.status == status).count()
    }
}

pub struct Master {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn WorkerRegistry>,
    config: MasterConfig,
}

impl Master {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<dyn WorkerRegistry>,
        config: MasterConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
        }
    }

    /// Push a task to the queue. A task without an id gets a fresh UUID.
    /// Returns the id.
    pub async fn submit_task(&self, mut task: Task) -> Result<String> {
        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        self.queue.push(&task).await?;
        info!(
            task_id = %task.id,
            kind = %task.workflow_kind,
            workflow = %task.workflow_name,
            scan_target = %task.target,
            "task submitted"
        );
        Ok(task.id)
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerInfo>> {
        self.registry.list().await
    }

    pub async fn queue_depth(&self) -> Result<usize> {
        self.queue.len().await
    }

    pub async fn status(&self) -> Result<ClusterStatus> {
        let now = Utc::now();
        let workers = self
            .registry
            .list()
            .await?
            .into_iter()
            .map(|mut worker| {
                worker.status = worker.effective_status(now, self.config.stale_after);
                worker
            })
            .collect();
        let pending = self.queue.len().await?;
        Ok(ClusterStatus { workers, pending })
    }

    /// Mark workers with stale heartbeats offline. Returns how many changed.
    pub async fn sweep_stale_workers(&self) -> Result<usize> {
        let now = Utc::now();
        let mut marked = 0;
        for mut worker in self.registry.list().await? {
            if worker.status == WorkerStatus::Offline
                || !worker.is_stale(now, self.config.stale_after)
            {
                continue;
            }
            warn!(
                worker_id = %worker.id,
                last_heartbeat = %worker.last_heartbeat,
                "worker heartbeat is stale, marking offline"
            );
            worker.status = WorkerStatus::Offline;
            self.registry.put(&worker).await?;
            marked += 1;
        }
        Ok(marked)
    }

    /// Run periodic maintenance until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.config.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("master started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.sweep_stale_workers().await {
                warn!(error = %e, "worker sweep failed");
            }
            match self.status().await {
                Ok(status) => debug!(
                    pending = status.pending,
                    idle = status.count(WorkerStatus::Idle),
                    busy = status.count(WorkerStatus::Busy),
                    offline = status.count(WorkerStatus::Offline),
                    "cluster status"
                ),
                Err(e) => warn!(error = %e, "failed to read cluster status"),
            }
        }
        info!("master stopped");
        Ok(())
    }
}
