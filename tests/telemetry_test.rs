//! Integration tests for telemetry initialization and span helpers.

use reconq::telemetry::{TelemetryConfig, init_telemetry, metrics, run};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process, so this may
    // return Err if another test got there first; that is acceptable.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "reconq-test".to_string(),
        default_filter: "debug".to_string(),
    };
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
    }
}

#[test]
fn config_reads_log_level_with_default() {
    unsafe {
        std::env::remove_var("OTEL_ENDPOINT");
        std::env::remove_var("LOG_LEVEL");
    }
    let config = TelemetryConfig::from_env("reconq");
    assert!(config.endpoint.is_none());
    assert_eq!(config.service_name, "reconq");
    assert_eq!(config.default_filter, "info");
}

#[test]
fn run_span_records_transition() {
    let span = run::start_run_span("flow", "general", "0b6c7e0e-run");
    run::record_status_transition(&span, "queued", "running");
    run::record_status_transition(&span, "running", "completed");
}

#[test]
fn metrics_record_without_a_provider() {
    metrics::tasks_discovered().add(1, &[]);
    metrics::task_duration_ms().record(12.5, &[]);
}
