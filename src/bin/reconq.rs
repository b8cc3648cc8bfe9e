//! reconq CLI: operator interface to the recon task queue.

use anyhow::Context as _;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use reconq::chunk::{self, ChunkInfo};
use reconq::config::{Config, MasterConfig, PollerConfig, WorkerConfig, executor_program};
use reconq::db::Db;
use reconq::distributed::{Master, Worker};
use reconq::engine::{ExecutionAdapter, QueuePoller, TaskReport};
use reconq::executor::CommandExecutor;
use reconq::model::{NewRun, Params, Task, WorkflowKind};
use reconq::params::{load_params_file, merge_params, parse_kv_list};
use reconq::queue::{RedisQueue, RedisRegistry, TaskQueue};
use reconq::store::RunStore;
use reconq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "reconq", about = "Distributed task queue for recon workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queued run operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Worker pool operations
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// Master operations
    Master {
        #[command(subcommand)]
        action: MasterAction,
    },
    /// Execute a workflow directly, without the queue
    Run {
        #[command(flatten)]
        workflow: WorkflowArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        chunk: ChunkArgs,
        /// Maximum concurrent runs
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Process queued runs until interrupted
    Run {
        /// Maximum concurrent runs
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Redis URL (overrides REDIS_URL)
        #[arg(long)]
        redis_url: Option<String>,
    },
    /// Queue runs for later processing
    Add {
        #[command(flatten)]
        workflow: WorkflowArgs,
        #[command(flatten)]
        targets: TargetArgs,
        #[command(flatten)]
        params: ParamArgs,
        #[command(flatten)]
        chunk: ChunkArgs,
        /// Queue one run over the whole target file instead of one per line
        #[arg(long, requires = "target_file")]
        file_input: bool,
        /// Also push each run to the Redis queue
        #[arg(long)]
        redis: bool,
        /// Priority (higher = more urgent)
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// List queued runs and pending Redis tasks
    List {
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Join the worker pool and process tasks until interrupted
    Join {
        /// Worker id (default: worker-<hostname>-<random>)
        #[arg(long)]
        id: Option<String>,
    },
    /// Show workers, queue depth and run counts
    Status,
}

#[derive(Subcommand)]
enum MasterAction {
    /// Run the master maintenance loop
    Serve,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct WorkflowArgs {
    /// Flow name
    #[arg(long)]
    flow: Option<String>,
    /// Module name
    #[arg(long)]
    module: Option<String>,
}

impl WorkflowArgs {
    fn resolve(&self) -> anyhow::Result<(WorkflowKind, String)> {
        match (&self.flow, &self.module) {
            (Some(flow), None) => Ok((WorkflowKind::Flow, flow.clone())),
            (None, Some(module)) => Ok((WorkflowKind::Module, module.clone())),
            _ => anyhow::bail!("exactly one of --flow or --module is required"),
        }
    }
}

#[derive(Args)]
struct TargetArgs {
    /// Target (repeatable)
    #[arg(short = 't', long = "target")]
    targets: Vec<String>,
    /// File with one target per line
    #[arg(short = 'T', long)]
    target_file: Option<PathBuf>,
}

impl TargetArgs {
    /// Flag targets first, then file lines. Blank lines and `#` comments
    /// are skipped.
    fn collect(&self) -> anyhow::Result<Vec<String>> {
        let mut targets: Vec<String> = self
            .targets
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(path) = &self.target_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading target file {}", path.display()))?;
            targets.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        if targets.is_empty() {
            anyhow::bail!("no targets given (use -t or -T)");
        }
        Ok(targets)
    }
}

#[derive(Args)]
struct ParamArgs {
    /// Workflow parameter as key=value (repeatable)
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,
    /// JSON or TOML file of parameters
    #[arg(long)]
    params_file: Option<PathBuf>,
}

impl ParamArgs {
    /// File params overridden by flag params. Built-ins are added at
    /// execution time.
    fn load(&self) -> anyhow::Result<Params> {
        let file = match &self.params_file {
            Some(path) => load_params_file(path)?,
            None => Params::new(),
        };
        let cli = parse_kv_list(&self.params)?;
        Ok(merge_params(&file, &cli, &Params::new()))
    }
}

#[derive(Args)]
struct ChunkArgs {
    /// Targets per chunk
    #[arg(long, conflicts_with = "chunk_count")]
    chunk_size: Option<i64>,
    /// Number of chunks to split the targets into
    #[arg(long)]
    chunk_count: Option<i64>,
    /// Chunk to process (0-indexed); omit to print the breakdown
    #[arg(long)]
    chunk_part: Option<i64>,
}

impl ChunkArgs {
    /// The targets for the selected chunk, or `None` after printing the
    /// breakdown in info mode.
    fn select<'a>(&self, targets: &'a [String]) -> anyhow::Result<Option<&'a [String]>> {
        let size = match (self.chunk_size, self.chunk_count) {
            (Some(size), _) => size,
            (None, Some(count)) => chunk::size_for_count(targets.len(), count),
            (None, None) => 0,
        };

        match chunk::chunk_targets(targets, size, self.chunk_part.unwrap_or(-1)) {
            Ok((selected, info)) => {
                if let Some(info) = info {
                    println!(
                        "Chunk {}/{}: targets {}..{} ({} of {})",
                        info.index,
                        info.total,
                        info.start,
                        info.end,
                        selected.len(),
                        targets.len()
                    );
                }
                Ok(Some(selected))
            }
            Err(e) if e.is_info() => {
                print_breakdown(targets.len(), size);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = init_telemetry(TelemetryConfig::from_env("reconq"))?;

    match cli.command {
        Command::Queue { action } => match action {
            QueueAction::Run {
                concurrency,
                redis_url,
            } => cmd_queue_run(concurrency, redis_url).await,
            QueueAction::Add {
                workflow,
                targets,
                params,
                chunk,
                file_input,
                redis,
                priority,
            } => {
                cmd_queue_add(
                    &workflow, &targets, &params, &chunk, file_input, redis, priority,
                )
                .await
            }
            QueueAction::List { limit } => cmd_queue_list(limit).await,
        },
        Command::Worker { action } => match action {
            WorkerAction::Join { id } => cmd_worker_join(id).await,
            WorkerAction::Status => cmd_worker_status().await,
        },
        Command::Master {
            action: MasterAction::Serve,
        } => cmd_master_serve().await,
        Command::Run {
            workflow,
            targets,
            params,
            chunk,
            concurrency,
        } => cmd_run(&workflow, &targets, &params, &chunk, concurrency).await,
    }
}

/// A token cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM, using Ctrl-C only"),
        }
    }
    tokio::signal::ctrl_c().await.ok();
}

async fn connect_db(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.prepare().await?;
    Ok(db)
}

async fn connect_queue(
    config: &Config,
    url: &str,
    max_block: Duration,
) -> anyhow::Result<RedisQueue> {
    Ok(RedisQueue::connect(url, config.queue_key.clone(), max_block).await?)
}

async fn cmd_queue_run(concurrency: usize, redis_url: Option<String>) -> anyhow::Result<()> {
    let config = Config::from_env()?.with_redis_url(redis_url);
    let poller_config = PollerConfig {
        concurrency,
        ..PollerConfig::default()
    };

    let poller = QueuePoller::connect(&config, poller_config).await?;
    poller.run_until(shutdown_token()).await?;
    Ok(())
}

async fn cmd_queue_add(
    workflow: &WorkflowArgs,
    targets: &TargetArgs,
    params: &ParamArgs,
    chunk: &ChunkArgs,
    file_input: bool,
    redis: bool,
    priority: i32,
) -> anyhow::Result<()> {
    let (kind, name) = workflow.resolve()?;
    let params = params.load()?;

    let new_runs: Vec<NewRun> = match (&targets.target_file, file_input) {
        (Some(path), true) => {
            let path = path.display().to_string();
            vec![
                NewRun::new(kind, &name, &path)
                    .input_file(&path)
                    .params(params.clone())
                    .priority(priority),
            ]
        }
        _ => {
            let all = targets.collect()?;
            let Some(selected) = chunk.select(&all)? else {
                return Ok(());
            };
            selected
                .iter()
                .map(|target| {
                    NewRun::new(kind, &name, target)
                        .params(params.clone())
                        .priority(priority)
                })
                .collect()
        }
    };

    let config = Config::from_env()?;
    let db = connect_db(&config).await?;
    let queue = if redis {
        Some(connect_queue(&config, config.require_redis()?, Duration::ZERO).await?)
    } else {
        None
    };

    for new in new_runs {
        let run = db.create_run(new).await?;
        if let Some(queue) = &queue {
            queue.push(&run.to_task()).await?;
        }
        println!(
            "Queued: {} ({} {} → {}){}",
            run.run_uuid,
            run.workflow_kind,
            run.workflow_name,
            run.target,
            if queue.is_some() { " [redis]" } else { "" }
        );
    }
    Ok(())
}

async fn cmd_queue_list(limit: i64) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let db = connect_db(&config).await?;

    let runs = db.list_queued_runs(limit).await?;
    if runs.is_empty() {
        println!("No queued runs.");
    } else {
        println!(
            "{:<8}  {:<6}  {:<20}  {:<30}  {:<4}  CREATED",
            "ID", "KIND", "WORKFLOW", "TARGET", "PRI"
        );
        println!("{}", "-".repeat(90));
        for run in &runs {
            println!(
                "{:<8}  {:<6}  {:<20}  {:<30}  {:<4}  {}",
                short(&run.run_uuid, 8),
                run.workflow_kind,
                short(&run.workflow_name, 20),
                short(&run.target, 30),
                run.run_priority,
                run.created_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!("\n{} queued run(s)", runs.len());
    }

    let Some(url) = config.redis_url.as_ref() else {
        return Ok(());
    };
    let queue = connect_queue(&config, url.expose_secret(), Duration::ZERO).await?;
    let pending = queue.len().await?;
    let tasks = queue.peek(usize::try_from(limit).unwrap_or(0)).await?;

    println!("\nRedis queue {}: {pending} pending", queue.key());
    if !tasks.is_empty() {
        println!(
            "{:<8}  {:<6}  {:<20}  {:<30}  SCAN",
            "ID", "KIND", "WORKFLOW", "TARGET"
        );
        println!("{}", "-".repeat(80));
        for task in &tasks {
            println!(
                "{:<8}  {:<6}  {:<20}  {:<30}  {}",
                short(&task.id, 8),
                task.workflow_kind,
                short(&task.workflow_name, 20),
                short(&task.target, 30),
                task.scan_id.as_deref().map(|s| short(s, 8)).unwrap_or("-")
            );
        }
    }
    Ok(())
}

async fn cmd_worker_join(id: Option<String>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let worker_config = WorkerConfig::default();
    let redis_url = config.require_redis()?;

    let queue = connect_queue(&config, redis_url, worker_config.pop_timeout).await?;
    let registry = RedisRegistry::connect(redis_url, config.workers_key.clone()).await?;
    let db = connect_db(&config).await?;
    let executor = CommandExecutor::new(config.executor.clone());

    let worker = Worker::new(
        id,
        Arc::new(queue),
        Arc::new(registry),
        Some(Arc::new(db) as Arc<dyn RunStore>),
        Arc::new(executor),
        worker_config,
    );
    println!("Worker {} joined", worker.id());
    worker.run(shutdown_token()).await?;

    let info = worker.info();
    println!(
        "Worker {} left: {} completed, {} failed",
        info.id, info.tasks_complete, info.tasks_failed
    );
    Ok(())
}

async fn cmd_worker_status() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let redis_url = config.require_redis()?;
    let queue = connect_queue(&config, redis_url, Duration::ZERO).await?;
    let registry = RedisRegistry::connect(redis_url, config.workers_key.clone()).await?;
    let master = Master::new(Arc::new(queue), Arc::new(registry), MasterConfig::default());

    let status = master.status().await?;
    let now = Utc::now();
    if status.workers.is_empty() {
        println!("No workers registered.");
    } else {
        println!(
            "{:<36}  {:<20}  {:<8}  {:>6}  {:>6}  LAST SEEN",
            "ID", "HOSTNAME", "STATUS", "DONE", "FAILED"
        );
        println!("{}", "-".repeat(100));
        for worker in &status.workers {
            println!(
                "{:<36}  {:<20}  {:<8}  {:>6}  {:>6}  {}",
                short(&worker.id, 36),
                short(&worker.hostname, 20),
                worker.status,
                worker.tasks_complete,
                worker.tasks_failed,
                format_age(worker.heartbeat_age(now))
            );
        }
    }
    println!("\nPending tasks: {}", status.pending);

    // Worker and queue state live in Redis; a database outage should not
    // hide them.
    let db = match Db::connect(config.database_url.expose_secret()).await {
        Ok(db) => db,
        Err(e) => {
            println!("Runs: database unreachable ({e})");
            return Ok(());
        }
    };
    if let Err(e) = db.health_check().await {
        println!("Runs: database unhealthy ({e})");
        return Ok(());
    }
    let counts = db
        .status_counts()
        .await?
        .into_iter()
        .map(|(status, count)| format!("{status} {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Runs: {counts}");
    Ok(())
}

async fn cmd_master_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let redis_url = config.require_redis()?;
    let queue = connect_queue(&config, redis_url, Duration::ZERO).await?;
    let registry = RedisRegistry::connect(redis_url, config.workers_key.clone()).await?;

    let master = Master::new(Arc::new(queue), Arc::new(registry), MasterConfig::default());
    master.run(shutdown_token()).await?;
    Ok(())
}

async fn cmd_run(
    workflow: &WorkflowArgs,
    targets: &TargetArgs,
    params: &ParamArgs,
    chunk: &ChunkArgs,
    concurrency: usize,
) -> anyhow::Result<()> {
    let (kind, name) = workflow.resolve()?;
    let params = params.load()?;
    let all = targets.collect()?;
    let Some(selected) = chunk.select(&all)? else {
        return Ok(());
    };

    let executor = CommandExecutor::new(executor_program());
    let adapter = Arc::new(ExecutionAdapter::new(Arc::new(executor), None));
    let limit = Arc::new(Semaphore::new(concurrency.max(1)));
    let cancel = shutdown_token();

    let mut runs = JoinSet::new();
    for target in selected {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&limit).acquire_owned() => permit?,
        };
        let mut task = Task::new(kind, &name, target).with_params(params.clone());
        task.id = Uuid::new_v4().to_string();

        let adapter = Arc::clone(&adapter);
        let cancel = cancel.child_token();
        runs.spawn(async move {
            let _permit = permit;
            (task.target.clone(), adapter.execute_task(&task, None, cancel).await)
        });
    }

    let mut reports: Vec<(String, TaskReport)> = Vec::new();
    while let Some(joined) = runs.join_next().await {
        reports.push(joined?);
    }

    let failed = reports.iter().filter(|(_, r)| !r.succeeded()).count();
    for (target, report) in &reports {
        match &report.error {
            Some(error) => println!("{:<10}  {target}  {error}", report.status),
            None => println!("{:<10}  {target}", report.status),
        }
    }
    println!("\n{} run(s), {failed} not completed", reports.len());

    if failed > 0 {
        anyhow::bail!("{failed} of {} run(s) did not complete", reports.len());
    }
    Ok(())
}

fn print_breakdown(len: usize, size: i64) {
    let size = usize::try_from(size).unwrap_or(0);
    let chunks: Vec<ChunkInfo> = chunk::breakdown(len, size);
    println!("{len} targets, chunk size {size}, {} chunk(s)", chunks.len());
    for info in &chunks {
        println!(
            "  --chunk-part {:<4}  targets {}..{} ({})",
            info.index,
            info.start,
            info.end,
            info.end - info.start
        );
    }
}

fn short(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}
