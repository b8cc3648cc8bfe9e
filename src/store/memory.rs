//! In-process run store.
//!
//! Used by tests and single-process setups. Each operation holds the lock for
//! its whole read-modify-write, which gives claims the same per-row atomicity
//! as the conditional UPDATE in Postgres.

use super::{RunStore, validate_update};
use crate::error::{Error, Result};
use crate::model::{NewRun, Run, RunStatus, workspace_name};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Rows {
    next_id: i64,
    runs: Vec<Run>,
}

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    rows: Mutex<Rows>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every row, in insertion order.
    pub fn all_runs(&self) -> Vec<Run> {
        self.lock().runs.clone()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn create_run(&self, new: NewRun) -> Result<Run> {
        let mut rows = self.lock();
        let run_uuid = new.resolved_uuid();
        if rows.runs.iter().any(|r| r.run_uuid == run_uuid) {
            return Err(Error::Other(format!("run {run_uuid} already exists")));
        }
        rows.next_id += 1;
        let input_is_file = new.input_file_path.is_some();
        let run = Run {
            id: rows.next_id,
            run_uuid,
            workspace: workspace_name(&new.target),
            workflow_name: new.workflow_name,
            workflow_kind: new.workflow_kind,
            target: new.target,
            params: new.params,
            status: RunStatus::Queued,
            trigger_type: new.trigger_type,
            is_queued: true,
            run_priority: new.run_priority,
            input_is_file,
            input_file_path: new.input_file_path,
            total_steps: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        rows.runs.push(run.clone());
        Ok(run)
    }

    async fn list_queued_runs(&self, limit: i64) -> Result<Vec<Run>> {
        let rows = self.lock();
        let mut queued: Vec<Run> = rows
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        queued.truncate(limit.max(0) as usize);
        Ok(queued)
    }

    async fn find_run(&self, run_uuid: &str) -> Result<Option<Run>> {
        Ok(self
            .lock()
            .runs
            .iter()
            .find(|r| r.run_uuid == run_uuid)
            .cloned())
    }

    async fn claim_queued_run(&self, id: i64) -> Result<bool> {
        let mut rows = self.lock();
        match rows
            .runs
            .iter_mut()
            .find(|r| r.id == id && r.status == RunStatus::Queued)
        {
            Some(run) => {
                run.status = RunStatus::Running;
                run.started_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_run_status(
        &self,
        run_uuid: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut rows = self.lock();
        let run = rows
            .runs
            .iter_mut()
            .find(|r| r.run_uuid == run_uuid)
            .ok_or_else(|| Error::NotFound(format!("run {run_uuid}")))?;

        validate_update(run.status, status)?;

        run.status = status;
        run.error_message = error.map(str::to_string);
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_total_steps(&self, run_uuid: &str, total_steps: i32) -> Result<()> {
        let mut rows = self.lock();
        let run = rows
            .runs
            .iter_mut()
            .find(|r| r.run_uuid == run_uuid)
            .ok_or_else(|| Error::NotFound(format!("run {run_uuid}")))?;
        run.total_steps = total_steps;
        Ok(())
    }

    async fn status_counts(&self) -> Result<Vec<(RunStatus, i64)>> {
        let rows = self.lock();
        Ok(RunStatus::ALL
            .into_iter()
            .map(|status| {
                let count = rows.runs.iter().filter(|r| r.status == status).count();
                (status, count as i64)
            })
            .collect())
    }
}
