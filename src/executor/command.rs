//! Executor that shells out to an external workflow runner.
//!
//! Invocation: `<program> <flow|module> <workflow> --target <target>`, with
//! every parameter exported as `RECON_PARAM_<KEY>` and the whole map as JSON
//! in `RECON_PARAMS`. If the last non-empty stdout line is a JSON
//! [`ExecutionResult`] it is used as the result; otherwise a zero exit means
//! completed.

use super::{ExecutionOutcome, ExecutionRequest, ExecutionResult, ExecutorError, WorkflowExecutor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest stderr excerpt kept in an error message.
const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: PathBuf,
    work_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: None,
        }
    }

    /// Run the executor from this directory instead of the process CWD.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Relative paths with a directory part resolve against the process CWD,
    /// not the work dir; bare names go through PATH.
    fn resolved_program(&self) -> std::io::Result<PathBuf> {
        let has_dir = self.program.components().count() > 1;
        if self.program.is_relative() && has_dir {
            Ok(std::env::current_dir()?.join(&self.program))
        } else {
            Ok(self.program.clone())
        }
    }

    async fn run(&self, request: ExecutionRequest, cancel: CancellationToken) -> ExecutionOutcome {
        let program = self.resolved_program().map_err(ExecutorError::Spawn)?;
        let params_json = serde_json::to_string(&request.params)
            .map_err(|e| ExecutorError::Other(format!("serialize params: {e}")))?;

        let mut command = Command::new(&program);
        command
            .arg(request.workflow_kind.to_string())
            .arg(&request.workflow_name)
            .arg("--target")
            .arg(&request.target)
            .env("RECON_TARGET", &request.target)
            .env("RECON_WORKFLOW", &request.workflow_name)
            .env("RECON_KIND", request.workflow_kind.to_string())
            .env("RECON_RUN_KEY", &request.key)
            .env("RECON_PARAMS", params_json)
            .envs(
                request
                    .params
                    .iter()
                    .map(|(key, value)| (format!("RECON_PARAM_{}", env_key(key)), value)),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }

        debug!(
            program = %program.display(),
            kind = %request.workflow_kind,
            workflow = %request.workflow_name,
            scan_target = %request.target,
            "starting executor"
        );

        let started = Instant::now();
        let child = command.spawn().map_err(ExecutorError::Spawn)?;

        // Dropping the wait future drops the child, and kill_on_drop kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(key = %request.key, "executor cancelled, killing process");
                return Err(ExecutorError::Cancelled);
            }
            output = child.wait_with_output() => output.map_err(|e| ExecutorError::Other(e.to_string()))?,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Exited {
                code: output.status.code().unwrap_or(-1),
                stderr: tail(stderr.trim(), STDERR_TAIL),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result = parse_result(&stdout)?;
        info!(
            key = %request.key,
            status = ?result.status,
            steps = result.steps,
            duration_ms = elapsed_ms,
            "executor finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl WorkflowExecutor for CommandExecutor {
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

/// Read the result line from executor stdout.
///
/// A last line that looks like JSON but does not parse is an error; plain
/// text output means the executor does not report results.
pub fn parse_result(stdout: &str) -> ExecutionOutcome {
    let Some(last) = stdout.lines().map(str::trim).rev().find(|l| !l.is_empty()) else {
        return Ok(ExecutionResult::completed(0));
    };
    if !last.starts_with('{') {
        return Ok(ExecutionResult::completed(0));
    }
    serde_json::from_str(last).map_err(|e| ExecutorError::Output(e.to_string()))
}

/// `dns-resolvers` → `DNS_RESOLVERS`.
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}
