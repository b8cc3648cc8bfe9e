//! Boundary to the external workflow executor.
//!
//! This crate never runs workflow steps itself. It hands a request to a
//! [`WorkflowExecutor`] and only cares whether the run completed, failed, or
//! was cancelled, plus a message for the run record.

pub mod command;

pub use command::CommandExecutor;

use crate::model::{Params, RunStatus, WorkflowKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything the executor needs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub workflow_kind: WorkflowKind,
    pub workflow_name: String,
    pub target: String,
    /// Fully merged parameters, built-ins included.
    pub params: Params,
    /// Correlation key of the task (run UUID when one exists).
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Executor's own report of a run that did not error out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub steps: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn completed(steps: u32) -> Self {
        Self {
            status: ExecutionStatus::Completed,
            steps,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            steps: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("failed to start executor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("executor exited with status {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("unreadable executor output: {0}")]
    Output(String),

    #[error("{0}")]
    Other(String),
}

impl ExecutorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Cancelled)
    }
}

pub type ExecutionOutcome = std::result::Result<ExecutionResult, ExecutorError>;

#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute_flow(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionOutcome;

    async fn execute_module(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionOutcome;
}

/// Route a request to the entry point for its workflow kind.
pub async fn execute(
    executor: &dyn WorkflowExecutor,
    request: ExecutionRequest,
    cancel: CancellationToken,
) -> ExecutionOutcome {
    match request.workflow_kind {
        WorkflowKind::Flow => executor.execute_flow(request, cancel).await,
        WorkflowKind::Module => executor.execute_module(request, cancel).await,
    }
}

/// Map an execution outcome to the terminal run status and error text.
///
/// Cancellation always wins over failure. A result that reports failure keeps
/// its own error text when it has one.
pub fn classify(outcome: &ExecutionOutcome) -> (RunStatus, Option<String>) {
    match outcome {
        Err(e) if e.is_cancelled() => (RunStatus::Cancelled, Some(e.to_string())),
        Err(e) => (RunStatus::Failed, Some(e.to_string())),
        Ok(result) => match result.status {
            ExecutionStatus::Completed => (RunStatus::Completed, None),
            ExecutionStatus::Cancelled => (
                RunStatus::Cancelled,
                Some(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| "execution cancelled".to_string()),
                ),
            ),
            ExecutionStatus::Failed => (
                RunStatus::Failed,
                Some(
                    result
                        .error
                        .clone()
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| "workflow execution failed".to_string()),
                ),
            ),
        },
    }
}
