//! Core data model.
//!
//! A run is one logical execution of a workflow against one target, tracked
//! durably in the run store. A task is the queue-native form of the same work,
//! carried through Redis. Workers are registry entries refreshed by heartbeats.

pub mod run;
pub mod task;
pub mod worker;

use std::collections::BTreeMap;

pub use run::{NewRun, Run, RunStatus, WorkflowKind, workspace_name};
pub use task::Task;
pub use worker::{WorkerInfo, WorkerStatus};

/// Workflow parameters. Ordered so rendering and env export are stable.
pub type Params = BTreeMap<String, String>;
