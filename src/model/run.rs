//! Runs and the run-status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Params, Task};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Workflow kind
// ---------------------------------------------------------------------------

/// The two workflow shapes the executor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Orchestrates several modules.
    Flow,
    /// A single unit of steps.
    Module,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowKind::Flow => "flow",
            WorkflowKind::Module => "module",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flow" => Ok(WorkflowKind::Flow),
            "module" => Ok(WorkflowKind::Module),
            other => Err(Error::Other(format!("unknown workflow kind: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by exactly one process and executing.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 5] = [
        RunStatus::Queued,
        RunStatus::Running,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    /// Can transition from self to `to`?
    ///
    /// Queued → Running is only ever taken by the claim primitive.
    pub fn can_transition_to(self, to: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, to),
            (Queued, Running) | (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Statuses from which `to` may be reached.
    pub fn predecessors(to: RunStatus) -> Vec<RunStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(to))
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown run status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One row of the run store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Internal surrogate key. Claims address rows by this id.
    pub id: i64,
    /// External, globally unique identifier. Correlates queue tasks.
    pub run_uuid: String,
    pub workflow_name: String,
    pub workflow_kind: WorkflowKind,
    pub target: String,
    pub params: Params,
    pub status: RunStatus,
    /// Who asked for the run (e.g. "cli", "api", "schedule").
    pub trigger_type: String,
    pub is_queued: bool,
    pub run_priority: i32,
    pub input_is_file: bool,
    pub input_file_path: Option<String>,
    pub workspace: String,
    pub total_steps: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// The queue-native form of this run, correlated by its UUID.
    pub fn to_task(&self) -> Task {
        Task {
            id: self.run_uuid.clone(),
            scan_id: Some(self.run_uuid.clone()),
            workflow_name: self.workflow_name.clone(),
            workflow_kind: self.workflow_kind,
            target: self.target.clone(),
            params: self.params.clone(),
            input_is_file: self.input_is_file,
            input_file_path: self.input_file_path.clone(),
        }
    }
}

/// Derive a filesystem-safe workspace name from a target.
///
/// `https://Example.com:8443/a` becomes `example.com_8443_a`.
pub fn workspace_name(target: &str) -> String {
    let trimmed = target
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let mut name: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    while name.ends_with('_') {
        name.pop();
    }
    if name.is_empty() {
        "default".to_string()
    } else {
        name
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for creating new runs. Runs always start queued.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub(crate) workflow_name: String,
    pub(crate) workflow_kind: WorkflowKind,
    pub(crate) target: String,
    pub(crate) params: Params,
    pub(crate) trigger_type: String,
    pub(crate) run_priority: i32,
    pub(crate) input_file_path: Option<String>,
    pub(crate) run_uuid: Option<String>,
}

impl NewRun {
    pub fn new(
        workflow_kind: WorkflowKind,
        workflow_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_kind,
            target: target.into(),
            params: Params::new(),
            trigger_type: "cli".to_string(),
            run_priority: 0,
            input_file_path: None,
            run_uuid: None,
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn trigger(mut self, trigger_type: impl Into<String>) -> Self {
        self.trigger_type = trigger_type.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.run_priority = priority;
        self
    }

    /// Mark the target as a file of targets.
    pub fn input_file(mut self, path: impl Into<String>) -> Self {
        self.input_file_path = Some(path.into());
        self
    }

    /// Use a caller-chosen UUID instead of a fresh one.
    pub fn run_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.run_uuid = Some(uuid.into());
        self
    }

    pub(crate) fn resolved_uuid(&self) -> String {
        self.run_uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}
