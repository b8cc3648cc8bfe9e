//! Admission: dedup by correlation key, then claim against the run store.
//!
//! Both task sources feed candidates through the same [`ClaimGate`], so the
//! rules for dropping duplicates do not depend on where a task came from.

use crate::error::Result;
use crate::model::{RunStatus, Task};
use crate::store::RunStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Where a candidate was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// The run store's queued rows.
    Db,
    /// The shared Redis list.
    Redis,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::Db => "db",
            SourceKind::Redis => "redis",
        };
        write!(f, "{s}")
    }
}

/// Correlation keys this process has already admitted or dropped.
///
/// Grows for the life of the process; keys are only removed when admission
/// fails with an error and the candidate goes back to its source.
#[derive(Debug, Default)]
pub struct SeenSet {
    keys: Mutex<HashSet<String>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `key` seen. Returns `true` only for the first caller.
    pub fn mark(&self, key: &str) -> bool {
        self.lock().insert(key.to_string())
    }

    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// A task offered by a source, not yet admitted.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: SourceKind,
    pub task: Task,
    /// Run-store id, when the source already knows the row.
    pub run_id: Option<i64>,
}

/// A task this process owns and must execute.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub source: SourceKind,
    pub task: Task,
    /// UUID of the claimed run; `None` for queue-only tasks with no run row.
    pub run_uuid: Option<String>,
}

impl ClaimedTask {
    pub fn key(&self) -> &str {
        self.task.correlation_key()
    }
}

#[derive(Debug)]
pub enum Admission {
    Accepted(ClaimedTask),
    /// Key already seen by this process.
    Seen,
    /// The run exists but is past `queued`.
    NotClaimable(RunStatus),
    /// Another claimant won the conditional update.
    LostClaim,
}

impl Admission {
    fn drop_reason(&self) -> Option<&'static str> {
        match self {
            Admission::Accepted(_) => None,
            Admission::Seen => Some("seen"),
            Admission::NotClaimable(_) => Some("not_claimable"),
            Admission::LostClaim => Some("lost_claim"),
        }
    }
}

pub struct ClaimGate {
    seen: Arc<SeenSet>,
    store: Option<Arc<dyn RunStore>>,
}

impl ClaimGate {
    /// Without a store, admission is dedup only.
    pub fn new(seen: Arc<SeenSet>, store: Option<Arc<dyn RunStore>>) -> Self {
        Self { seen, store }
    }

    pub fn seen(&self) -> &Arc<SeenSet> {
        &self.seen
    }

    /// Decide whether this process runs `candidate`.
    ///
    /// On error the key is forgotten so the candidate can be retried once the
    /// caller hands it back to its source.
    pub async fn admit(&self, candidate: &Candidate) -> Result<Admission> {
        let key = candidate.task.correlation_key();

        let admission = if self.seen.mark(key) {
            match self.claim(candidate, key).await {
                Ok(admission) => admission,
                Err(e) => {
                    self.seen.forget(key);
                    return Err(e);
                }
            }
        } else {
            Admission::Seen
        };

        if let Some(reason) = admission.drop_reason() {
            debug!(source = %candidate.source, key, reason, "candidate dropped");
            metrics::tasks_dropped().add(
                1,
                &[
                    KeyValue::new("source", candidate.source.to_string()),
                    KeyValue::new("reason", reason),
                ],
            );
        }
        Ok(admission)
    }

    async fn claim(&self, candidate: &Candidate, key: &str) -> Result<Admission> {
        let accepted = |run_uuid: Option<String>| {
            Admission::Accepted(ClaimedTask {
                source: candidate.source,
                task: candidate.task.clone(),
                run_uuid,
            })
        };

        let Some(store) = &self.store else {
            return Ok(accepted(None));
        };

        let run_id = match candidate.run_id {
            Some(id) => id,
            // The same logical run may also be sitting in the run store;
            // only a still-queued row may be taken, and only via the claim.
            // A failed or cancelled row stays as it is and the task runs
            // unrecorded, like a task with no row at all.
            None => match store.find_run(key).await? {
                None => return Ok(accepted(None)),
                Some(run) => match run.status {
                    RunStatus::Queued => run.id,
                    RunStatus::Failed | RunStatus::Cancelled => return Ok(accepted(None)),
                    status => return Ok(Admission::NotClaimable(status)),
                },
            },
        };

        let claimed = store.claim_queued_run(run_id).await?;
        metrics::claim_attempts().add(
            1,
            &[
                KeyValue::new("source", candidate.source.to_string()),
                KeyValue::new("result", if claimed { "claimed" } else { "lost" }),
            ],
        );
        if claimed {
            Ok(accepted(Some(key.to_string())))
        } else {
            Ok(Admission::LostClaim)
        }
    }
}
