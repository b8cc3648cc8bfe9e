use serde::{Deserialize, Serialize};

use super::{Params, WorkflowKind};

/// A queue-native unit of work, as pushed onto the Redis list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// UUID of the run this task belongs to, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub workflow_name: String,
    pub workflow_kind: WorkflowKind,
    pub target: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub input_is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file_path: Option<String>,
}

impl Task {
    /// A task with no id yet; submitters assign one.
    pub fn new(
        workflow_kind: WorkflowKind,
        workflow_name: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            scan_id: None,
            workflow_name: workflow_name.into(),
            workflow_kind,
            target: target.into(),
            params: Params::new(),
            input_is_file: false,
            input_file_path: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_scan_id(mut self, scan_id: impl Into<String>) -> Self {
        self.scan_id = Some(scan_id.into());
        self
    }

    /// Key used for dedup and run-store cross-checks: the scan id when
    /// present, otherwise the task id.
    pub fn correlation_key(&self) -> &str {
        match self.scan_id.as_deref() {
            Some(scan_id) if !scan_id.is_empty() => scan_id,
            _ => &self.id,
        }
    }
}
