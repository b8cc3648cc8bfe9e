//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Connection strings carry credentials, so they are wrapped in
//! secrecy::SecretString to keep them out of logs.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE_KEY: &str = "reconq:tasks";
pub const DEFAULT_WORKERS_KEY: &str = "reconq:workers";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub redis_url: Option<SecretString>,
    /// Program that executes a single workflow.
    pub executor: PathBuf,
    /// Redis list holding pending tasks.
    pub queue_key: String,
    /// Redis hash holding worker heartbeats.
    pub workers_key: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            redis_url: optional_var("REDIS_URL").map(SecretString::from),
            executor: executor_program(),
            queue_key: optional_var("RECON_QUEUE_KEY")
                .unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
            workers_key: optional_var("RECON_WORKERS_KEY")
                .unwrap_or_else(|| DEFAULT_WORKERS_KEY.to_string()),
        })
    }

    /// Replace the Redis URL, e.g. from a command-line flag.
    pub fn with_redis_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.redis_url = Some(SecretString::from(url));
        }
        self
    }

    /// The Redis URL, or a configuration error when Redis is required but unset.
    pub fn require_redis(&self) -> Result<&str> {
        self.redis_url
            .as_ref()
            .map(|url| url.expose_secret())
            .ok_or_else(|| Error::Config("REDIS_URL is required for this command".to_string()))
    }
}

/// Settings for the queue poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Number of executor tasks, and so the cap on concurrent runs.
    pub concurrency: usize,
    /// How often the run store is polled for queued rows.
    pub db_poll_interval: Duration,
    /// Upper bound on a single blocking Redis pop.
    pub redis_pop_timeout: Duration,
    /// Pause after a failed Redis pop.
    pub redis_retry_delay: Duration,
    /// Maximum queued rows fetched per poll.
    pub batch_size: i64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            db_poll_interval: Duration::from_secs(5),
            redis_pop_timeout: Duration::from_secs(2),
            redis_retry_delay: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

impl PollerConfig {
    /// Capacity of the shared work channel.
    pub fn channel_capacity(&self) -> usize {
        self.concurrency.max(1) * 2
    }
}

/// Settings for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub heartbeat_interval: Duration,
    pub pop_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            pop_timeout: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Settings for the master process.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub maintenance_interval: Duration,
    /// A worker whose last heartbeat is older than this is considered offline.
    pub stale_after: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(15),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// The executor program: `RECON_EXECUTOR`, or `recon-exec` on PATH.
///
/// Separate from [`Config::from_env`] so direct runs work without a database.
pub fn executor_program() -> PathBuf {
    optional_var("RECON_EXECUTOR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("recon-exec"))
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

pub(crate) fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
