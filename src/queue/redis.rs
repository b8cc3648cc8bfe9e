use super::{TaskQueue, WorkerRegistry};
use crate::error::Result;
use crate::model::{Task, WorkerInfo};
use crate::telemetry::metrics;
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Headroom on top of a blocking pop's own timeout before the client gives up.
const BLOCKING_HEADROOM: Duration = Duration::from_secs(5);

/// Connect a connection manager whose response timeout tolerates blocking
/// pops of up to `max_block`.
async fn connect(url: &str, max_block: Duration) -> Result<ConnectionManager> {
    let client = Client::open(url)?;
    let config =
        ConnectionManagerConfig::new().set_response_timeout(Some(max_block + BLOCKING_HEADROOM));
    let conn = ConnectionManager::new_with_config(client, config).await?;
    Ok(conn)
}

fn record(operation: &'static str) {
    metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
}

/// Task queue on a Redis list.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("connection", &"ConnectionManager")
            .field("key", &self.key)
            .finish()
    }
}

impl RedisQueue {
    /// Connect to Redis. `max_block` is the longest pop timeout callers will use.
    pub async fn connect(url: &str, key: impl Into<String>, max_block: Duration) -> Result<Self> {
        let key = key.into();
        let conn = connect(url, max_block).await?;
        info!(queue = %key, "connected to redis task queue");
        Ok(Self { conn, key })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn push(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.clone();
        let _: usize = conn.rpush(&self.key, payload).await?;
        record("push");
        debug!(task_id = %task.id, queue = %self.key, "task pushed");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Task>> {
        let mut conn = self.conn.clone();
        // BLPOP with a zero timeout blocks forever; keep it bounded.
        let secs = timeout.as_secs_f64().max(0.1);
        let popped: Option<(String, String)> = conn.blpop(&self.key, secs).await?;

        let Some((_, payload)) = popped else {
            record("pop_empty");
            return Ok(None);
        };
        record("pop");

        match serde_json::from_str::<Task>(&payload) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                // A malformed entry would otherwise be retried forever.
                warn!(queue = %self.key, error = %e, "dropping malformed task payload");
                record("pop_malformed");
                Ok(None)
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(&self.key).await?)
    }

    async fn peek(&self, limit: usize) -> Result<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(&self.key, 0, limit as isize - 1).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        ::redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Worker registry on a Redis hash: worker id → JSON entry.
#[derive(Clone)]
pub struct RedisRegistry {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRegistry")
            .field("connection", &"ConnectionManager")
            .field("key", &self.key)
            .finish()
    }
}

impl RedisRegistry {
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self> {
        let conn = connect(url, Duration::ZERO).await?;
        Ok(Self {
            conn,
            key: key.into(),
        })
    }
}

#[async_trait]
impl WorkerRegistry for RedisRegistry {
    async fn put(&self, worker: &WorkerInfo) -> Result<()> {
        let payload = serde_json::to_string(worker)?;
        let mut conn = self.conn.clone();
        let _: usize = conn.hset(&self.key, &worker.id, payload).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerInfo>> {
        let mut conn = self.conn.clone();
        let entries: HashMap<String, String> = conn.hgetall(&self.key).await?;
        let mut workers: Vec<WorkerInfo> = entries
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(worker) => Some(worker),
                Err(e) => {
                    warn!(worker_id = %id, error = %e, "skipping malformed worker entry");
                    None
                }
            })
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }
}
