//! Runs one claimed task through the executor and records the outcome.

use super::gate::ClaimedTask;
use crate::executor::{ExecutionRequest, WorkflowExecutor, classify, execute};
use crate::model::{Params, RunStatus, Task, workspace_name};
use crate::params::{builtins, merge_params};
use crate::store::RunStore;
use crate::telemetry::metrics;
use crate::telemetry::run::{record_status_transition, start_run_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// What happened to one executed task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub key: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub steps: u32,
    pub duration_ms: f64,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

pub struct ExecutionAdapter {
    executor: Arc<dyn WorkflowExecutor>,
    store: Option<Arc<dyn RunStore>>,
}

impl ExecutionAdapter {
    /// Without a store, outcomes are logged but not persisted.
    pub fn new(executor: Arc<dyn WorkflowExecutor>, store: Option<Arc<dyn RunStore>>) -> Self {
        Self { executor, store }
    }

    /// Build the executor request for a task, built-in params included.
    pub fn request_for(task: &Task) -> ExecutionRequest {
        let workspace = workspace_name(&task.target);
        let builtin = builtins(&task.target, task.input_file_path.as_deref(), &workspace);
        ExecutionRequest {
            workflow_kind: task.workflow_kind,
            workflow_name: task.workflow_name.clone(),
            target: task.target.clone(),
            params: merge_params(&task.params, &Params::new(), &builtin),
            key: task.correlation_key().to_string(),
        }
    }

    /// Execute a claimed task to a terminal status.
    ///
    /// Never fails: executor errors become a `failed` status, and store
    /// write errors are logged.
    pub async fn execute(&self, claimed: &ClaimedTask, cancel: CancellationToken) -> TaskReport {
        self.execute_task(&claimed.task, claimed.run_uuid.as_deref(), cancel)
            .await
    }

    /// Execute a task directly. With `run_uuid`, the outcome is written to
    /// that run; the caller must already own it.
    pub async fn execute_task(
        &self,
        task: &Task,
        run_uuid: Option<&str>,
        cancel: CancellationToken,
    ) -> TaskReport {
        let kind = task.workflow_kind.to_string();
        let key = task.correlation_key();
        let span = start_run_span(&kind, &task.workflow_name, key);

        async {
            info!(scan_target = %task.target, "executing workflow");
            let request = Self::request_for(task);
            let started = Instant::now();
            let outcome = execute(self.executor.as_ref(), request, cancel).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let (status, message) = classify(&outcome);
            let steps = outcome.as_ref().map(|r| r.steps).unwrap_or(0);
            record_status_transition(&span, "running", status.as_str());
            metrics::task_duration_ms().record(
                duration_ms,
                &[
                    KeyValue::new("kind", kind.clone()),
                    KeyValue::new("status", status.to_string()),
                ],
            );

            if let Some(run_uuid) = run_uuid {
                self.persist(run_uuid, status, message.as_deref(), steps).await;
            }

            match status {
                RunStatus::Completed => info!(steps, duration_ms, "workflow completed"),
                RunStatus::Cancelled => warn!(error = ?message, "workflow cancelled"),
                _ => warn!(error = ?message, duration_ms, "workflow failed"),
            }

            TaskReport {
                key: key.to_string(),
                status,
                error: message,
                steps,
                duration_ms,
            }
        }
        .instrument(span.clone())
        .await
    }

    /// Mark a claimed task cancelled without running it.
    ///
    /// Used for tasks that were claimed but never reached an executor.
    pub async fn abandon(&self, claimed: &ClaimedTask, reason: &str) {
        let Some(run_uuid) = &claimed.run_uuid else {
            return;
        };
        let Some(store) = &self.store else {
            return;
        };
        match store
            .update_run_status(run_uuid, RunStatus::Cancelled, Some(reason))
            .await
        {
            Ok(()) => {
                record_status_write(RunStatus::Cancelled);
                info!(run_uuid = %run_uuid, reason, "claimed run cancelled before dispatch")
            }
            Err(e) => error!(run_uuid = %run_uuid, error = %e, "failed to cancel undispatched run"),
        }
    }

    async fn persist(&self, run_uuid: &str, status: RunStatus, message: Option<&str>, steps: u32) {
        let Some(store) = &self.store else {
            return;
        };
        match store.update_run_status(run_uuid, status, message).await {
            Ok(()) => record_status_write(status),
            Err(e) => error!(run_uuid, error = %e, "failed to record run status"),
        }
        if steps > 0 {
            let steps = i32::try_from(steps).unwrap_or(i32::MAX);
            if let Err(e) = store.record_total_steps(run_uuid, steps).await {
                error!(run_uuid, error = %e, "failed to record step count");
            }
        }
    }
}

fn record_status_write(status: RunStatus) {
    metrics::run_status_updates().add(1, &[KeyValue::new("status", status.to_string())]);
}
