//! Admission: dedup by correlation key, then the claim.

use reconq::engine::{
    Admission, Candidate, ClaimGate, QueueSource, RunStoreSource, SeenSet, SourceKind, TaskSource,
};
use reconq::model::{NewRun, RunStatus, Task, WorkflowKind};
use reconq::queue::{MemoryQueue, TaskQueue};
use reconq::store::{MemoryRunStore, RunStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn gate(store: &Arc<MemoryRunStore>) -> ClaimGate {
    ClaimGate::new(Arc::new(SeenSet::new()), Some(store.clone() as Arc<dyn RunStore>))
}

fn from_queue(task: Task) -> Candidate {
    Candidate {
        source: SourceKind::Redis,
        task,
        run_id: None,
    }
}

#[test]
fn seen_set_marks_once() {
    let seen = SeenSet::new();
    assert!(seen.is_empty());
    assert!(seen.mark("run-1"));
    assert!(!seen.mark("run-1"));
    assert!(seen.contains("run-1"));
    assert_eq!(seen.len(), 1);

    seen.forget("run-1");
    assert!(!seen.contains("run-1"));
    assert!(seen.mark("run-1"));
}

#[test]
fn source_kinds_display() {
    assert_eq!(SourceKind::Db.to_string(), "db");
    assert_eq!(SourceKind::Redis.to_string(), "redis");
}

#[tokio::test]
async fn db_candidate_is_claimed_once() {
    let store = Arc::new(MemoryRunStore::new());
    let run = store
        .create_run(NewRun::new(WorkflowKind::Flow, "general", "example.com"))
        .await
        .unwrap();
    let gate = gate(&store);

    let candidate = Candidate {
        source: SourceKind::Db,
        task: run.to_task(),
        run_id: Some(run.id),
    };
    match gate.admit(&candidate).await.unwrap() {
        Admission::Accepted(claimed) => {
            assert_eq!(claimed.key(), run.run_uuid);
            assert_eq!(claimed.run_uuid.as_deref(), Some(run.run_uuid.as_str()));
        }
        other => panic!("expected acceptance, got {other:?}"),
    }
    assert!(matches!(gate.admit(&candidate).await.unwrap(), Admission::Seen));

    let run = store.find_run(&run.run_uuid).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
}

#[tokio::test]
async fn losing_the_claim_drops_the_candidate() {
    let store = Arc::new(MemoryRunStore::new());
    let run = store
        .create_run(NewRun::new(WorkflowKind::Flow, "general", "example.com"))
        .await
        .unwrap();

    // Two processes with their own seen-sets race on one row.
    let ours = gate(&store);
    let theirs = gate(&store);
    let candidate = Candidate {
        source: SourceKind::Db,
        task: run.to_task(),
        run_id: Some(run.id),
    };
    assert!(matches!(
        theirs.admit(&candidate).await.unwrap(),
        Admission::Accepted(_)
    ));
    assert!(matches!(
        ours.admit(&candidate).await.unwrap(),
        Admission::LostClaim
    ));
}

#[tokio::test]
async fn queue_task_for_a_queued_run_claims_it() {
    let store = Arc::new(MemoryRunStore::new());
    let run = store
        .create_run(NewRun::new(WorkflowKind::Module, "portscan", "10.0.0.1"))
        .await
        .unwrap();

    let admission = gate(&store).admit(&from_queue(run.to_task())).await.unwrap();
    let Admission::Accepted(claimed) = admission else {
        panic!("expected acceptance, got {admission:?}");
    };
    assert_eq!(claimed.source, SourceKind::Redis);
    assert_eq!(claimed.run_uuid.as_deref(), Some(run.run_uuid.as_str()));
    let run = store.find_run(&run.run_uuid).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
}

#[tokio::test]
async fn queue_task_for_a_running_run_is_not_claimable() {
    let store = Arc::new(MemoryRunStore::new());
    let run = store
        .create_run(NewRun::new(WorkflowKind::Flow, "general", "example.com"))
        .await
        .unwrap();
    store.claim_queued_run(run.id).await.unwrap();

    let admission = gate(&store).admit(&from_queue(run.to_task())).await.unwrap();
    assert!(matches!(
        admission,
        Admission::NotClaimable(RunStatus::Running)
    ));
}

#[tokio::test]
async fn queue_task_for_a_failed_or_cancelled_run_runs_unrecorded() {
    for finished in [RunStatus::Failed, RunStatus::Cancelled] {
        let store = Arc::new(MemoryRunStore::new());
        let run = store
            .create_run(NewRun::new(WorkflowKind::Flow, "general", "example.com"))
            .await
            .unwrap();
        store.claim_queued_run(run.id).await.unwrap();
        store
            .update_run_status(&run.run_uuid, finished, Some("first attempt"))
            .await
            .unwrap();

        let admission = gate(&store).admit(&from_queue(run.to_task())).await.unwrap();
        let Admission::Accepted(claimed) = admission else {
            panic!("{finished} run: expected acceptance, got {admission:?}");
        };
        assert!(claimed.run_uuid.is_none());
        assert_eq!(claimed.key(), run.run_uuid);

        // The finished row is left alone.
        let row = store.find_run(&run.run_uuid).await.unwrap().unwrap();
        assert_eq!(row.status, finished);
        assert_eq!(row.error_message.as_deref(), Some("first attempt"));
    }
}

#[tokio::test]
async fn queue_task_for_a_completed_run_is_not_claimable() {
    let store = Arc::new(MemoryRunStore::new());
    let run = store
        .create_run(NewRun::new(WorkflowKind::Flow, "general", "example.com"))
        .await
        .unwrap();
    store.claim_queued_run(run.id).await.unwrap();
    store
        .update_run_status(&run.run_uuid, RunStatus::Completed, None)
        .await
        .unwrap();

    let admission = gate(&store).admit(&from_queue(run.to_task())).await.unwrap();
    assert!(matches!(
        admission,
        Admission::NotClaimable(RunStatus::Completed)
    ));
}

#[tokio::test]
async fn queue_task_without_a_run_is_accepted_unrecorded() {
    let store = Arc::new(MemoryRunStore::new());
    let mut task = Task::new(WorkflowKind::Flow, "general", "example.com");
    task.id = "adhoc".to_string();

    let admission = gate(&store).admit(&from_queue(task)).await.unwrap();
    let Admission::Accepted(claimed) = admission else {
        panic!("expected acceptance, got {admission:?}");
    };
    assert!(claimed.run_uuid.is_none());
    assert_eq!(claimed.key(), "adhoc");
}

#[tokio::test]
async fn without_a_store_admission_is_dedup_only() {
    let gate = ClaimGate::new(Arc::new(SeenSet::new()), None);
    let mut task = Task::new(WorkflowKind::Flow, "general", "example.com");
    task.id = "t-1".to_string();

    assert!(matches!(
        gate.admit(&from_queue(task.clone())).await.unwrap(),
        Admission::Accepted(_)
    ));
    assert!(matches!(
        gate.admit(&from_queue(task)).await.unwrap(),
        Admission::Seen
    ));
    assert!(gate.seen().contains("t-1"));
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_store_source_lists_queued_rows() {
    let store = Arc::new(MemoryRunStore::new());
    let a = store
        .create_run(NewRun::new(WorkflowKind::Flow, "general", "a.com"))
        .await
        .unwrap();
    let b = store
        .create_run(NewRun::new(WorkflowKind::Flow, "general", "b.com"))
        .await
        .unwrap();
    store.claim_queued_run(a.id).await.unwrap();

    let source = RunStoreSource::new(store.clone(), Duration::from_millis(10), 10);
    assert_eq!(source.kind(), SourceKind::Db);
    let batch = source.next_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].run_id, Some(b.id));
    assert_eq!(batch[0].task.correlation_key(), b.run_uuid);
}

#[tokio::test]
async fn run_store_source_returns_empty_once_cancelled() {
    let store = Arc::new(MemoryRunStore::new());
    let source = RunStoreSource::new(store, Duration::from_secs(3600), 10);
    let cancel = CancellationToken::new();
    // The first tick is immediate; the second would wait an hour.
    source.next_batch(&cancel).await.unwrap();
    cancel.cancel();

    let batch = tokio::time::timeout(Duration::from_secs(1), source.next_batch(&cancel))
        .await
        .expect("cancelled poll should return promptly")
        .unwrap();
    assert!(batch.is_empty());
}

#[tokio::test]
async fn queue_source_releases_by_requeueing() {
    let queue = Arc::new(MemoryQueue::new());
    let mut task = Task::new(WorkflowKind::Module, "portscan", "10.0.0.1");
    task.id = "t-1".to_string();
    queue.push(&task).await.unwrap();

    let source = QueueSource::new(
        queue.clone(),
        Duration::from_millis(20),
        Duration::from_millis(5),
    );
    let mut batch = source.next_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(queue.pending(), 0);

    source.release(batch.remove(0)).await.unwrap();
    assert_eq!(queue.pending(), 1);

    // Empty queue: the pop times out with an empty batch.
    source.next_batch(&CancellationToken::new()).await.unwrap();
    let empty = source.next_batch(&CancellationToken::new()).await.unwrap();
    assert!(empty.is_empty());
}
