//! Run store operations via direct SQLx.

use crate::error::{Error, Result};
use crate::model::{NewRun, Params, Run, RunStatus, workspace_name};
use crate::store::{RunStore, validate_update};
use async_trait::async_trait;
use sqlx::types::Json;

const RUN_COLUMNS: &str = "id, run_uuid, workflow_name, workflow_kind, target, params, status, trigger_type, is_queued, run_priority, input_is_file, input_file_path, workspace, total_steps, error_message, created_at, started_at, completed_at";

#[async_trait]
impl RunStore for super::Db {
    async fn prepare(&self) -> Result<()> {
        self.migrate().await
    }

    async fn create_run(&self, new: NewRun) -> Result<Run> {
        let workspace = workspace_name(&new.target);
        let row: RunRow = sqlx::query_as(&format!(
            "INSERT INTO runs (run_uuid, workflow_name, workflow_kind, target, params, status, trigger_type, is_queued, run_priority, input_is_file, input_file_path, workspace)
             VALUES ($1, $2, $3, $4, $5, 'queued', $6, TRUE, $7, $8, $9, $10)
             RETURNING {RUN_COLUMNS}"
        ))
        .bind(new.resolved_uuid())
        .bind(&new.workflow_name)
        .bind(new.workflow_kind.to_string())
        .bind(&new.target)
        .bind(Json(&new.params))
        .bind(&new.trigger_type)
        .bind(new.run_priority)
        .bind(new.input_file_path.is_some())
        .bind(&new.input_file_path)
        .bind(workspace)
        .fetch_one(&self.pool)
        .await?;

        row.try_into_run()
    }

    async fn list_queued_runs(&self, limit: i64) -> Result<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM runs
             WHERE status = 'queued'
             ORDER BY created_at ASC, id ASC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RunRow::try_into_run).collect()
    }

    async fn find_run(&self, run_uuid: &str) -> Result<Option<Run>> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_uuid = $1"))
                .bind(run_uuid)
                .fetch_optional(&self.pool)
                .await?;

        row.map(RunRow::try_into_run).transpose()
    }

    async fn claim_queued_run(&self, id: i64) -> Result<bool> {
        // One conditional write: the row-level check on status is what makes
        // concurrent claimers, in this or any other process, see one winner.
        let rows_affected = sqlx::query(
            "UPDATE runs SET status = 'running', started_at = now()
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    async fn update_run_status(
        &self,
        run_uuid: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let sources: Vec<String> = RunStatus::predecessors(status)
            .into_iter()
            .filter(|from| *from != RunStatus::Queued)
            .map(|from| from.to_string())
            .collect();

        let rows_affected = sqlx::query(
            "UPDATE runs SET status = $1, error_message = $2,
                completed_at = CASE WHEN $3 THEN now() ELSE completed_at END
             WHERE run_uuid = $4 AND status = ANY($5)",
        )
        .bind(status.to_string())
        .bind(error)
        .bind(status.is_terminal())
        .bind(run_uuid)
        .bind(&sources)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return match self.find_run(run_uuid).await? {
                None => Err(Error::NotFound(format!("run {run_uuid}"))),
                Some(run) => {
                    validate_update(run.status, status)?;
                    // Raced with another writer between the update and the read.
                    Err(Error::InvalidTransition {
                        from: run.status.to_string(),
                        to: status.to_string(),
                    })
                }
            };
        }

        Ok(())
    }

    async fn record_total_steps(&self, run_uuid: &str, total_steps: i32) -> Result<()> {
        let rows_affected = sqlx::query("UPDATE runs SET total_steps = $1 WHERE run_uuid = $2")
            .bind(total_steps)
            .bind(run_uuid)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("run {run_uuid}")));
        }
        Ok(())
    }

    async fn status_counts(&self) -> Result<Vec<(RunStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM runs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts: Vec<(RunStatus, i64)> =
            RunStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for (status, count) in rows {
            let status: RunStatus = status.parse()?;
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == status) {
                entry.1 = count;
            }
        }
        Ok(counts)
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    run_uuid: String,
    workflow_name: String,
    workflow_kind: String,
    target: String,
    params: Json<Params>,
    status: String,
    trigger_type: String,
    is_queued: bool,
    run_priority: i32,
    input_is_file: bool,
    input_file_path: Option<String>,
    workspace: String,
    total_steps: i32,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RunRow {
    fn try_into_run(self) -> Result<Run> {
        Ok(Run {
            id: self.id,
            run_uuid: self.run_uuid,
            workflow_name: self.workflow_name,
            workflow_kind: self.workflow_kind.parse()?,
            target: self.target,
            params: self.params.0,
            status: self.status.parse()?,
            trigger_type: self.trigger_type,
            is_queued: self.is_queued,
            run_priority: self.run_priority,
            input_is_file: self.input_is_file,
            input_file_path: self.input_file_path,
            workspace: self.workspace,
            total_steps: self.total_steps,
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
