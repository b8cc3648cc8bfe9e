use reconq::executor::command::parse_result;
use reconq::executor::{
    CommandExecutor, ExecutionRequest, ExecutionResult, ExecutionStatus, ExecutorError,
    WorkflowExecutor, classify, execute,
};
use reconq::model::{Params, RunStatus, WorkflowKind};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Outcome classification
// ---------------------------------------------------------------------------

#[test]
fn completed_result_has_no_error_text() {
    let (status, message) = classify(&Ok(ExecutionResult::completed(5)));
    assert_eq!(status, RunStatus::Completed);
    assert!(message.is_none());
}

#[test]
fn failed_result_keeps_its_own_error_text() {
    let (status, message) = classify(&Ok(ExecutionResult::failed("step 3: timeout")));
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(message.as_deref(), Some("step 3: timeout"));
}

#[test]
fn failed_result_without_text_gets_a_generic_message() {
    let result = ExecutionResult {
        status: ExecutionStatus::Failed,
        steps: 2,
        error: Some("  ".into()),
    };
    let (status, message) = classify(&Ok(result));
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(message.as_deref(), Some("workflow execution failed"));
}

#[test]
fn executor_errors_are_failures() {
    let outcome = Err(ExecutorError::Exited {
        code: 2,
        stderr: "bad flag".into(),
    });
    let (status, message) = classify(&outcome);
    assert_eq!(status, RunStatus::Failed);
    assert!(message.unwrap().contains("bad flag"));
}

#[test]
fn cancellation_is_never_a_failure() {
    let (status, _) = classify(&Err(ExecutorError::Cancelled));
    assert_eq!(status, RunStatus::Cancelled);

    let reported = ExecutionResult {
        status: ExecutionStatus::Cancelled,
        steps: 1,
        error: None,
    };
    let (status, message) = classify(&Ok(reported));
    assert_eq!(status, RunStatus::Cancelled);
    assert!(message.is_some());
}

// ---------------------------------------------------------------------------
// Result parsing
// ---------------------------------------------------------------------------

#[test]
fn last_json_line_is_the_result() {
    let stdout = "starting\n[+] 12 hosts\n{\"status\":\"completed\",\"steps\":7}\n\n";
    let result = parse_result(stdout).unwrap();
    assert_eq!(result, ExecutionResult::completed(7));
}

#[test]
fn plain_output_means_completed() {
    assert_eq!(
        parse_result("all done\n").unwrap(),
        ExecutionResult::completed(0)
    );
    assert_eq!(parse_result("").unwrap(), ExecutionResult::completed(0));
}

#[test]
fn broken_json_result_is_an_output_error() {
    let err = parse_result("{\"status\": \"compl").unwrap_err();
    assert!(matches!(err, ExecutorError::Output(_)));
}

#[test]
fn failed_json_result_carries_error() {
    let result = parse_result(r#"{"status":"failed","error":"dns timeout"}"#).unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.steps, 0);
    assert_eq!(result.error.as_deref(), Some("dns timeout"));
}

// ---------------------------------------------------------------------------
// Command executor
// ---------------------------------------------------------------------------

/// A work dir holding a shell script per workflow kind. The executor is
/// `sh`, so `sh flow <name> --target <target>` runs `./flow`.
#[cfg(unix)]
fn script_dir(flow: &str, module: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("reconq-exec-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("flow"), flow).unwrap();
    std::fs::write(dir.join("module"), module).unwrap();
    dir
}

fn request(kind: WorkflowKind, params: &[(&str, &str)]) -> ExecutionRequest {
    let params: Params = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ExecutionRequest {
        workflow_kind: kind,
        workflow_name: "portscan".to_string(),
        target: "example.com".to_string(),
        params,
        key: "run-1".to_string(),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn command_result_is_read_from_stdout() {
    let dir = script_dir(
        "echo \"scanning $3\"\necho '{\"status\":\"completed\",\"steps\":4}'\n",
        "exit 1\n",
    );
    let executor = CommandExecutor::new("sh").work_dir(&dir);

    let result = executor
        .execute_flow(request(WorkflowKind::Flow, &[]), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, ExecutionResult::completed(4));
}

#[cfg(unix)]
#[tokio::test]
async fn command_sees_params_in_its_environment() {
    let dir = script_dir(
        "exit 1\n",
        "printf '{\"status\":\"failed\",\"error\":\"%s %s %s %s\"}\\n' \"$RECON_PARAM_DNS_RESOLVERS\" \"$RECON_KIND\" \"$1\" \"$RECON_RUN_KEY\"\n",
    );
    let executor = CommandExecutor::new("sh").work_dir(&dir);

    let outcome = execute(
        &executor,
        request(WorkflowKind::Module, &[("dns-resolvers", "8.8.8.8")]),
        CancellationToken::new(),
    )
    .await;
    let result = outcome.unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("8.8.8.8 module portscan run-1")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn nonzero_exit_reports_stderr() {
    let dir = script_dir("echo 'no such wordlist' >&2\nexit 3\n", "exit 0\n");
    let executor = CommandExecutor::new("sh").work_dir(&dir);

    let err = executor
        .execute_flow(request(WorkflowKind::Flow, &[]), CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ExecutorError::Exited { code, stderr } => {
            assert_eq!(code, 3);
            assert_eq!(stderr, "no such wordlist");
        }
        other => panic!("expected exit error, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_kills_the_command() {
    let dir = script_dir("exec sleep 30\n", "exec sleep 30\n");
    let executor = CommandExecutor::new("sh").work_dir(&dir);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute_flow(request(WorkflowKind::Flow, &[]), cancel),
    )
    .await
    .expect("cancelled command should return promptly");
    assert!(outcome.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let executor = CommandExecutor::new("/nonexistent/recon-exec");
    let err = executor
        .execute_module(request(WorkflowKind::Module, &[]), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Spawn(_)));

    let (status, _) = classify(&Err(err));
    assert_eq!(status, RunStatus::Failed);
}
