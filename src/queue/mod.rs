//! The shared task queue and the worker registry.
//!
//! Redis backs both in production: a list for tasks (push to the tail, pop
//! from the head) and a hash of JSON worker entries. Delivery is best-effort;
//! a task popped by a process that then dies is lost.

pub mod memory;
pub mod redis;

pub use self::memory::{MemoryQueue, MemoryRegistry};
pub use self::redis::{RedisQueue, RedisRegistry};

use crate::error::Result;
use crate::model::{Task, WorkerInfo};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task to the tail of the queue.
    async fn push(&self, task: &Task) -> Result<()>;

    /// Pop the head of the queue, waiting at most `timeout`.
    ///
    /// Not cancel-safe: dropping the future mid-wait can lose a task that the
    /// server already removed. Callers rely on the timeout for responsiveness.
    async fn pop(&self, timeout: Duration) -> Result<Option<Task>>;

    async fn len(&self) -> Result<usize>;

    /// The first `limit` pending tasks, without removing them.
    async fn peek(&self, limit: usize) -> Result<Vec<Task>>;

    /// Verify the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Insert or refresh a worker entry.
    async fn put(&self, worker: &WorkerInfo) -> Result<()>;

    async fn list(&self) -> Result<Vec<WorkerInfo>>;
}
