//! In-process queue and registry with the same semantics as the Redis ones.

use super::{TaskQueue, WorkerRegistry};
use crate::error::Result;
use crate::model::{Task, WorkerInfo};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<Task>>,
    pushed: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of queued tasks, without going through the async trait.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn push(&self, task: &Task) -> Result<()> {
        self.lock().push_back(task.clone());
        self.pushed.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let pushed = self.pushed.notified();
            if let Some(task) = self.lock().pop_front() {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(self.lock().pop_front());
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.lock().len())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<Task>> {
        Ok(self.lock().iter().take(limit).cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    workers: Mutex<BTreeMap<String, WorkerInfo>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, WorkerInfo>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WorkerRegistry for MemoryRegistry {
    async fn put(&self, worker: &WorkerInfo) -> Result<()> {
        self.lock().insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerInfo>> {
        Ok(self.lock().values().cloned().collect())
    }
}
