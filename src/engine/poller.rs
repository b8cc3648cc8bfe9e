//! The queue poller: discovers runs from two sources and executes each
//! logical run at most once in this process.
//!
//! Layout while running:
//!
//! ```text
//! RunStoreSource ─┐                    ┌─ executor 0
//!                 ├─ ClaimGate ─ chan ─┼─ executor 1
//! QueueSource ────┘  (bounded, 2×N)    └─ executor N-1
//! ```
//!
//! A source blocks on a full channel, so discovery never outruns execution
//! by more than the channel capacity.

use super::adapter::ExecutionAdapter;
use super::gate::{Admission, Candidate, ClaimGate, ClaimedTask, SeenSet};
use super::source::{QueueSource, RunStoreSource, TaskSource};
use crate::config::{Config, PollerConfig};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, WorkflowExecutor};
use crate::queue::{RedisQueue, TaskQueue};
use crate::store::RunStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Error text recorded on runs claimed but never handed to an executor.
pub const STOPPED_BEFORE_DISPATCH: &str = "poller stopped before the run was dispatched";

type Backlog = Arc<Mutex<mpsc::Receiver<ClaimedTask>>>;

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    backlog: Backlog,
}

/// What the spawned loops share.
struct Shared {
    gate: ClaimGate,
    adapter: ExecutionAdapter,
    queue: Option<Arc<dyn TaskQueue>>,
}

impl Shared {
    /// Give up on a claimed task that will not run here.
    ///
    /// Runs with a row are marked cancelled; queue-only tasks go back to the
    /// queue for another consumer.
    async fn abandon(&self, claimed: ClaimedTask) {
        if claimed.run_uuid.is_some() {
            self.adapter.abandon(&claimed, STOPPED_BEFORE_DISPATCH).await;
            return;
        }
        let Some(queue) = &self.queue else {
            warn!(key = claimed.key(), "dropping undispatched task with no run record");
            return;
        };
        if let Err(e) = queue.push(&claimed.task).await {
            error!(key = claimed.key(), error = %e, "failed to requeue undispatched task");
        }
    }
}

pub struct QueuePoller {
    config: PollerConfig,
    store: Arc<dyn RunStore>,
    shared: Arc<Shared>,
    state: Mutex<Option<Running>>,
}

impl QueuePoller {
    /// Build a poller over a run store and, optionally, a shared queue.
    pub fn new(
        config: PollerConfig,
        store: Arc<dyn RunStore>,
        queue: Option<Arc<dyn TaskQueue>>,
        executor: Arc<dyn WorkflowExecutor>,
    ) -> Self {
        let seen = Arc::new(SeenSet::new());
        let shared = Shared {
            gate: ClaimGate::new(seen, Some(Arc::clone(&store))),
            adapter: ExecutionAdapter::new(executor, Some(Arc::clone(&store))),
            queue,
        };
        Self {
            config,
            store,
            shared: Arc::new(shared),
            state: Mutex::new(None),
        }
    }

    /// Connect to Postgres, and to Redis when a URL is configured, and run
    /// workflows through the configured executor program.
    pub async fn connect(config: &Config, poller: PollerConfig) -> Result<Self> {
        let db = Db::connect(config.database_url.expose_secret()).await?;

        let queue: Option<Arc<dyn TaskQueue>> = match &config.redis_url {
            Some(url) => Some(Arc::new(
                RedisQueue::connect(
                    url.expose_secret(),
                    config.queue_key.clone(),
                    poller.redis_pop_timeout,
                )
                .await?,
            )),
            None => {
                info!("no redis url configured, polling the run store only");
                None
            }
        };

        let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
        Ok(Self::new(poller, Arc::new(db), queue, executor))
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// The keys this poller has admitted or dropped so far.
    pub fn seen(&self) -> &Arc<SeenSet> {
        self.shared.gate.seen()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Spawn the source loops and the executor pool.
    ///
    /// Fails with [`Error::AlreadyRunning`] if already started, or with the
    /// backend error if the run store cannot be prepared or the queue is
    /// unreachable.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(Error::AlreadyRunning);
        }

        self.store.prepare().await?;
        if let Some(queue) = &self.shared.queue {
            queue.ping().await?;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity());
        let backlog: Backlog = Arc::new(Mutex::new(rx));

        let mut sources: Vec<Arc<dyn TaskSource>> = vec![Arc::new(RunStoreSource::new(
            Arc::clone(&self.store),
            self.config.db_poll_interval,
            self.config.batch_size,
        ))];
        if let Some(queue) = &self.shared.queue {
            sources.push(Arc::new(QueueSource::new(
                Arc::clone(queue),
                self.config.redis_pop_timeout,
                self.config.redis_retry_delay,
            )));
        }

        let mut handles = Vec::new();
        for source in sources {
            let span = info_span!("poller.source", source = %source.kind());
            handles.push(tokio::spawn(
                source_loop(source, Arc::clone(&self.shared), tx.clone(), cancel.clone())
                    .instrument(span),
            ));
        }
        // Only the source loops hold senders; the channel closes when they exit.
        drop(tx);

        let concurrency = self.config.concurrency.max(1);
        for slot in 0..concurrency {
            let span = info_span!("poller.executor", slot);
            handles.push(tokio::spawn(
                executor_loop(Arc::clone(&self.shared), Arc::clone(&backlog), cancel.clone())
                    .instrument(span),
            ));
        }

        info!(
            concurrency,
            redis = self.shared.queue.is_some(),
            "queue poller started"
        );
        *state = Some(Running {
            cancel,
            handles,
            backlog,
        });
        Ok(())
    }

    /// Cancel all loops and wait for them to exit.
    ///
    /// Runs still waiting in the channel are marked cancelled. Safe to call
    /// when not started.
    pub async fn stop(&self) {
        let Some(running) = self.state.lock().await.take() else {
            return;
        };

        info!("queue poller stopping");
        running.cancel.cancel();
        for handle in running.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "poller task ended abnormally");
            }
        }

        let mut backlog = running.backlog.lock().await;
        let mut abandoned = 0usize;
        while let Ok(claimed) = backlog.try_recv() {
            self.shared.abandon(claimed).await;
            abandoned += 1;
        }
        info!(abandoned, "queue poller stopped");
    }

    /// Start, run until `shutdown` fires, then stop.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        self.start().await?;
        shutdown.cancelled().await;
        self.stop().await;
        Ok(())
    }
}

async fn source_loop(
    source: Arc<dyn TaskSource>,
    shared: Arc<Shared>,
    tx: mpsc::Sender<ClaimedTask>,
    cancel: CancellationToken,
) {
    let kind = source.kind();
    debug!("task source started");

    while !cancel.is_cancelled() {
        let batch = match source.next_batch(&cancel).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "task source poll failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(source.retry_delay()) => {}
                }
                continue;
            }
        };

        for candidate in batch {
            metrics::tasks_discovered().add(1, &[KeyValue::new("source", kind.to_string())]);

            if cancel.is_cancelled() {
                release(source.as_ref(), candidate).await;
                continue;
            }

            let claimed = match shared.gate.admit(&candidate).await {
                Ok(Admission::Accepted(claimed)) => claimed,
                Ok(_) => continue,
                Err(e) => {
                    warn!(key = candidate.task.correlation_key(), error = %e, "admission failed");
                    release(source.as_ref(), candidate).await;
                    continue;
                }
            };

            // Waiting for a permit is the backpressure on discovery.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => shared.abandon(claimed).await,
                permit = tx.reserve() => match permit {
                    Ok(permit) => {
                        debug!(key = claimed.key(), "task dispatched");
                        permit.send(claimed);
                    }
                    Err(_) => shared.abandon(claimed).await,
                },
            }
        }
    }

    debug!("task source stopped");
}

async fn release(source: &dyn TaskSource, candidate: Candidate) {
    let key = candidate.task.correlation_key().to_string();
    if let Err(e) = source.release(candidate).await {
        error!(key, error = %e, "failed to release candidate");
    }
}

async fn executor_loop(shared: Arc<Shared>, backlog: Backlog, cancel: CancellationToken) {
    loop {
        let next = {
            let mut rx = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                rx = backlog.lock() => rx,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => next,
            }
        };
        let Some(claimed) = next else {
            break;
        };
        shared.adapter.execute(&claimed, cancel.child_token()).await;
    }
}
