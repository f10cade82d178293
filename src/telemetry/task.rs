//! Task execution span helpers.
//!
//! Provides span creation and status-transition recording for tasks
//! flowing through a worker.

use tracing::Span;
use uuid::Uuid;

/// Start a span covering one task's claim → execute → commit pipeline.
///
/// The `task.status` field is declared empty and updated via
/// [`record_state_transition`].
pub fn start_task_span(worker: &str, task_id: &Uuid) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.worker" = worker,
        "task.id" = %task_id,
        "task.status" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
