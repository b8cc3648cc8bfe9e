//! Metric instrument factories for reconq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("reconq")
}

/// Counter: candidates produced by a task source.
/// Labels: `source` ("db" | "redis").
pub fn tasks_discovered() -> Counter<u64> {
    meter()
        .u64_counter("reconq.tasks.discovered")
        .with_description("Candidate tasks produced by a task source")
        .build()
}

/// Counter: candidates dropped at admission.
/// Labels: `source`, `reason` ("seen" | "not_claimable" | "lost_claim").
pub fn tasks_dropped() -> Counter<u64> {
    meter()
        .u64_counter("reconq.tasks.dropped")
        .with_description("Candidate tasks dropped by dedup or claim")
        .build()
}

/// Counter: claim attempts against the run store.
/// Labels: `source`, `result` ("claimed" | "lost").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("reconq.runs.claim_attempts")
        .with_description("Conditional claim attempts on queued runs")
        .build()
}

/// Counter: run status writes after a claim.
/// Labels: `status`.
pub fn run_status_updates() -> Counter<u64> {
    meter()
        .u64_counter("reconq.runs.status_updates")
        .with_description("Run status writes")
        .build()
}

/// Counter: queue-level operations (push, pop, pop_empty, requeue).
/// Labels: `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("reconq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: worker heartbeats written to the registry.
/// Labels: `status`.
pub fn worker_heartbeats() -> Counter<u64> {
    meter()
        .u64_counter("reconq.worker.heartbeats")
        .with_description("Worker heartbeats written")
        .build()
}

/// Histogram: workflow execution duration in milliseconds.
/// Labels: `kind`, `status`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("reconq.task.duration_ms")
        .with_description("Workflow execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
