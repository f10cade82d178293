//! Metric instrument factories for taskrelay.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskrelay"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for taskrelay instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskrelay")
}

/// Counter: number of task submissions handled by the gateway.
/// Labels: `result` ("ok" | "invalid" | "store_error").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.tasks.submitted")
        .with_description("Number of task submissions")
        .build()
}

/// Counter: task status transitions committed by the store.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.tasks.state_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: broker publishes that failed after a successful store commit.
pub fn dispatch_failures() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.dispatch.failures")
        .with_description("Dispatch publishes that failed after the task was persisted")
        .build()
}

/// Counter: dispatch messages re-published by the recovery sweep.
pub fn dispatch_recoveries() -> Counter<u64> {
    meter()
        .u64_counter("taskrelay.dispatch.recoveries")
        .with_description("Dispatch messages re-published for stale pending tasks")
        .build()
}

/// Histogram: execution engine call duration in milliseconds.
/// Labels: `result` ("ok" | "error").
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskrelay.execution.duration_ms")
        .with_description("Execution engine call duration in milliseconds")
        .with_unit("ms")
        .build()
}
