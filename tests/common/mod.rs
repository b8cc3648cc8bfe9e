//! Test executors and polling helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use reconq::executor::{
    ExecutionOutcome, ExecutionRequest, ExecutionResult, ExecutionStatus, ExecutorError,
    WorkflowExecutor,
};
use reconq::model::{Run, RunStatus};
use reconq::store::RunStore;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a [`ScriptedExecutor`] answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Complete { steps: u32 },
    Fail(String),
    /// Report cancellation without waiting.
    ReportCancelled,
    /// Block until cancelled, then report it.
    WaitForCancel,
    /// Sleep, then complete.
    Slow(Duration),
}

/// Records every request and answers according to its [`Behavior`].
pub struct ScriptedExecutor {
    behavior: Behavior,
    calls: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn completing() -> Self {
        Self::new(Behavior::Complete { steps: 3 })
    }

    pub fn calls(&self) -> Vec<ExecutionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of executions per correlation key.
    pub fn counts_by_key(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for call in self.calls.lock().unwrap().iter() {
            *counts.entry(call.key.clone()).or_insert(0) += 1;
        }
        counts
    }

    async fn run(&self, request: ExecutionRequest, cancel: CancellationToken) -> ExecutionOutcome {
        self.calls.lock().unwrap().push(request);
        match &self.behavior {
            Behavior::Complete { steps } => Ok(ExecutionResult::completed(*steps)),
            Behavior::Fail(message) => Ok(ExecutionResult::failed(message.clone())),
            Behavior::ReportCancelled => Ok(ExecutionResult {
                status: ExecutionStatus::Cancelled,
                steps: 0,
                error: None,
            }),
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Err(ExecutorError::Cancelled)
            }
            Behavior::Slow(delay) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
                    _ = tokio::time::sleep(*delay) => Ok(ExecutionResult::completed(1)),
                }
            }
        }
    }
}

#[async_trait]
impl WorkflowExecutor for ScriptedExecutor {
    async fn execute_flow(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        self.run(request, cancel).await
    }

    async fn execute_module(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        self.run(request, cancel).await
    }
}

/// Poll until `check` passes or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the store until the run reaches `status`.
pub async fn wait_for_status(
    store: &dyn RunStore,
    run_uuid: &str,
    status: RunStatus,
    timeout: Duration,
) -> Run {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let run = store.find_run(run_uuid).await.unwrap().unwrap();
        if run.status == status {
            return run;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run {run_uuid} stuck in {} waiting for {status}",
            run.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
