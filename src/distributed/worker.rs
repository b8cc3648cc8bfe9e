//! Worker: pulls tasks from the shared queue and runs them one at a time.

use crate::config::WorkerConfig;
use crate::engine::{
    Admission, Candidate, ClaimGate, ClaimedTask, ExecutionAdapter, SeenSet, SourceKind,
    TaskReport,
};
use crate::error::Result;
use crate::executor::WorkflowExecutor;
use crate::model::{Task, WorkerInfo, WorkerStatus};
use crate::queue::{TaskQueue, WorkerRegistry};
use crate::store::RunStore;
use crate::telemetry::metrics;
use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// This machine's hostname, or `"unknown"`.
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A fresh worker id: `worker-<hostname>-<8 hex chars>`.
pub fn generate_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", local_hostname(), &suffix[..8])
}

pub struct Worker {
    info: Mutex<WorkerInfo>,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<dyn WorkerRegistry>,
    gate: ClaimGate,
    adapter: ExecutionAdapter,
    config: WorkerConfig,
}

impl Worker {
    /// With a run store, tasks that correspond to a run are claimed before
    /// they execute and their outcome is recorded.
    pub fn new(
        id: Option<String>,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<dyn WorkerRegistry>,
        store: Option<Arc<dyn RunStore>>,
        executor: Arc<dyn WorkflowExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_worker_id);
        Self {
            info: Mutex::new(WorkerInfo::new(id, local_hostname())),
            queue,
            registry,
            gate: ClaimGate::new(Arc::new(SeenSet::new()), store.clone()),
            adapter: ExecutionAdapter::new(executor, store),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerInfo> {
        self.info.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    /// Snapshot of this worker's registry entry.
    pub fn info(&self) -> WorkerInfo {
        self.lock().clone()
    }

    /// Pull and execute tasks until `cancel` fires, then report offline.
    ///
    /// Fails only if the initial registration cannot be written; later
    /// queue and registry errors are logged and retried.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let span = info_span!("worker", worker_id = %self.id());
        async {
            self.heartbeat(WorkerStatus::Idle).await?;
            info!(hostname = %self.lock().hostname, "worker joined");

            let mut last_beat = Instant::now();
            while !cancel.is_cancelled() {
                if last_beat.elapsed() >= self.config.heartbeat_interval {
                    self.try_heartbeat(WorkerStatus::Idle).await;
                    last_beat = Instant::now();
                }

                match self.queue.pop(self.config.pop_timeout).await {
                    Ok(None) => {}
                    Ok(Some(task)) => {
                        self.handle(task, &cancel).await;
                        self.try_heartbeat(WorkerStatus::Idle).await;
                        last_beat = Instant::now();
                    }
                    Err(e) => {
                        warn!(error = %e, "queue pop failed");
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tokio::time::sleep(self.config.retry_delay) => {}
                        }
                    }
                }
            }

            self.try_heartbeat(WorkerStatus::Offline).await;
            info!("worker stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn handle(&self, task: Task, cancel: &CancellationToken) {
        let candidate = Candidate {
            source: SourceKind::Redis,
            task,
            run_id: None,
        };

        if cancel.is_cancelled() {
            self.requeue(&candidate.task).await;
            return;
        }

        let claimed = match self.gate.admit(&candidate).await {
            Ok(Admission::Accepted(claimed)) => claimed,
            Ok(admission) => {
                debug!(key = candidate.task.correlation_key(), ?admission, "task skipped");
                return;
            }
            Err(e) => {
                warn!(key = candidate.task.correlation_key(), error = %e, "admission failed");
                self.requeue(&candidate.task).await;
                return;
            }
        };

        self.try_heartbeat(WorkerStatus::Busy).await;
        let report = self.execute_with_heartbeats(&claimed, cancel).await;

        let mut info = self.lock();
        if report.succeeded() {
            info.tasks_complete += 1;
        } else {
            info.tasks_failed += 1;
        }
    }

    /// Run a claimed task, heartbeating `busy` on the usual interval until it
    /// finishes so a long scan is not mistaken for a dead worker.
    async fn execute_with_heartbeats(
        &self,
        claimed: &ClaimedTask,
        cancel: &CancellationToken,
    ) -> TaskReport {
        // interval_at panics on a zero period.
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let execution = self.adapter.execute(claimed, cancel.child_token());
        tokio::pin!(execution);
        loop {
            tokio::select! {
                report = &mut execution => return report,
                _ = ticker.tick() => self.try_heartbeat(WorkerStatus::Busy).await,
            }
        }
    }

    async fn requeue(&self, task: &Task) {
        match self.queue.push(task).await {
            Ok(()) => debug!(task_id = %task.id, "task returned to queue"),
            Err(e) => warn!(task_id = %task.id, error = %e, "failed to requeue task"),
        }
    }

    async fn heartbeat(&self, status: WorkerStatus) -> Result<()> {
        let entry = {
            let mut info = self.lock();
            info.status = status;
            info.last_heartbeat = Utc::now();
            info.clone()
        };
        self.registry.put(&entry).await?;
        metrics::worker_heartbeats().add(1, &[KeyValue::new("status", status.to_string())]);
        Ok(())
    }

    async fn try_heartbeat(&self, status: WorkerStatus) {
        if let Err(e) = self.heartbeat(status).await {
            warn!(%status, error = %e, "heartbeat failed");
        }
    }
}
