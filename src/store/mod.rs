//! The run store: durable record of every logical run.
//!
//! The claim primitive lives here. Implementations must apply
//! `claim_queued_run` as a single conditional write on the row so that
//! independent processes racing on the same run see exactly one winner.

pub mod memory;

pub use memory::MemoryRunStore;

use crate::error::{Error, Result};
use crate::model::{NewRun, Run, RunStatus};
use async_trait::async_trait;

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Ensure the schema exists.
    async fn prepare(&self) -> Result<()>;

    /// Insert a new run in the queued state.
    async fn create_run(&self, new: NewRun) -> Result<Run>;

    /// Queued runs, oldest first.
    async fn list_queued_runs(&self, limit: i64) -> Result<Vec<Run>>;

    async fn find_run(&self, run_uuid: &str) -> Result<Option<Run>>;

    /// Move a run from queued to running. `false` means someone else got it
    /// first (or it was never queued); that is an expected outcome.
    async fn claim_queued_run(&self, id: i64) -> Result<bool>;

    /// Write a post-claim status and error text. Rejects transitions the
    /// state machine does not allow.
    async fn update_run_status(
        &self,
        run_uuid: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn record_total_steps(&self, run_uuid: &str, total_steps: i32) -> Result<()>;

    /// Number of runs per status, for status displays.
    async fn status_counts(&self) -> Result<Vec<(RunStatus, i64)>>;
}

/// Validate a status transition, returning an error if disallowed.
///
/// Queued → Running is reserved for the claim primitive and rejected here.
pub(crate) fn validate_update(from: RunStatus, to: RunStatus) -> Result<()> {
    if from != RunStatus::Queued && from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
