//! Run execution span helpers.

use tracing::Span;

/// Start a span covering one workflow execution.
///
/// `run.status` is declared empty and filled in by
/// [`record_status_transition`].
pub fn start_run_span(kind: &str, workflow: &str, key: &str) -> Span {
    tracing::info_span!(
        "run.execute",
        "run.kind" = kind,
        "run.workflow" = workflow,
        "run.key" = key,
        "run.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit an event inside it.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("run.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
