//! Task sources feeding the poller.

use super::gate::{Candidate, SourceKind};
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::store::RunStore;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[async_trait]
pub trait TaskSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Wait for the next batch of candidates. An empty batch is normal.
    /// Must return promptly (possibly empty) once `cancel` fires.
    async fn next_batch(&self, cancel: &CancellationToken) -> Result<Vec<Candidate>>;

    /// Take back a candidate that was fetched but not admitted.
    async fn release(&self, candidate: Candidate) -> Result<()>;

    /// Pause after `next_batch` fails, before trying again.
    fn retry_delay(&self) -> Duration;
}

/// Polls the run store for queued rows on a fixed interval.
pub struct RunStoreSource {
    store: Arc<dyn RunStore>,
    ticker: Mutex<Interval>,
    batch_size: i64,
}

impl RunStoreSource {
    pub fn new(store: Arc<dyn RunStore>, poll_interval: Duration, batch_size: i64) -> Self {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            store,
            ticker: Mutex::new(ticker),
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl TaskSource for RunStoreSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Db
    }

    async fn next_batch(&self, cancel: &CancellationToken) -> Result<Vec<Candidate>> {
        {
            let mut ticker = self.ticker.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Vec::new()),
                _ = ticker.tick() => {}
            }
        }

        let runs = self.store.list_queued_runs(self.batch_size).await?;
        if !runs.is_empty() {
            debug!(count = runs.len(), "queued runs found");
        }
        Ok(runs
            .into_iter()
            .map(|run| Candidate {
                source: SourceKind::Db,
                task: run.to_task(),
                run_id: Some(run.id),
            })
            .collect())
    }

    async fn release(&self, _candidate: Candidate) -> Result<()> {
        // The row is still queued; the next poll finds it again.
        Ok(())
    }

    fn retry_delay(&self) -> Duration {
        // The ticker already paces retries.
        Duration::ZERO
    }
}

/// Pops tasks from the shared queue, one per batch.
pub struct QueueSource {
    queue: Arc<dyn TaskQueue>,
    pop_timeout: Duration,
    retry_delay: Duration,
}

impl QueueSource {
    pub fn new(queue: Arc<dyn TaskQueue>, pop_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            queue,
            pop_timeout,
            retry_delay,
        }
    }
}

#[async_trait]
impl TaskSource for QueueSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Redis
    }

    async fn next_batch(&self, cancel: &CancellationToken) -> Result<Vec<Candidate>> {
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }
        // Not raced against `cancel`: the bounded timeout keeps shutdown
        // responsive without risking a task the server already handed out.
        let popped = self.queue.pop(self.pop_timeout).await?;
        Ok(popped
            .into_iter()
            .map(|task| Candidate {
                source: SourceKind::Redis,
                task,
                run_id: None,
            })
            .collect())
    }

    async fn release(&self, candidate: Candidate) -> Result<()> {
        self.queue.push(&candidate.task).await?;
        metrics::queue_operations().add(1, &[KeyValue::new("operation", "requeue")]);
        debug!(task_id = %candidate.task.id, "task returned to queue");
        Ok(())
    }

    fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}
