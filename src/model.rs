//! Core data model.
//!
//! A task is a unit of submitted work tracked through a closed lifecycle:
//! pending → processing → completed | failed. The payload is opaque to the
//! engine; all the engine owns is the lifecycle and its audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of asynchronous work tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at creation, immutable.
    pub id: TaskId,

    /// Opaque submission payload. The engine never interprets this;
    /// it is handed verbatim to the execution engine.
    pub payload: serde_json::Value,

    /// Optional execution parameters, passed through alongside the payload.
    pub parameters: Option<serde_json::Value>,

    /// Current lifecycle status.
    pub status: TaskStatus,

    pub submitted_at: DateTime<Utc>,

    /// Set when the task reaches a terminal status, null before.
    pub completed_at: Option<DateTime<Utc>>,

    /// Execution result. Non-null iff status is completed.
    pub result: Option<serde_json::Value>,

    /// Captured execution error. Non-null iff status is failed.
    pub error_message: Option<String>,
}

/// Newtype for task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
///
/// Status only moves forward through the transition table below; terminal
/// states are immutable. Every change is recorded as a
/// [`StatusHistoryEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted, waiting for a worker to claim it.
    Pending,
    /// Claimed by a worker, execution in flight.
    Processing,
    /// Execution succeeded. Terminal.
    Completed,
    /// Execution or pre-execution validation failed. Terminal.
    Failed,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)       // worker claims
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Failed)     // pre-execution validation failure
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(crate::error::Error::Store(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status history
// ---------------------------------------------------------------------------

/// One row of a task's append-only audit trail.
///
/// Entries are created 1:1 with status changes, never mutated or deleted,
/// and strictly time-ordered per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub changed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Dispatch message
// ---------------------------------------------------------------------------

/// Ephemeral broker payload waking a worker for one task.
///
/// Carries only the task id plus a correlation token; all mutable state
/// stays in the store, so a redelivery always observes current truth. The
/// queue is the message's only home — once acknowledged it ceases to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub task_id: TaskId,
    pub correlation: Uuid,
}

impl DispatchMessage {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            correlation: Uuid::new_v4(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Outcome fields attached to a status transition.
///
/// Completed transitions must carry `Result`, failed transitions `Error`,
/// everything else `None`. The store enforces the pairing.
#[derive(Debug, Clone)]
pub enum Outcome {
    None,
    /// Execution result data. Opaque to the engine.
    Result(serde_json::Value),
    /// Captured error message.
    Error(String),
}

impl Outcome {
    /// Check that this outcome matches the target status.
    pub fn matches(&self, to: TaskStatus) -> bool {
        match to {
            TaskStatus::Completed => matches!(self, Outcome::Result(_)),
            TaskStatus::Failed => matches!(self, Outcome::Error(_)),
            _ => matches!(self, Outcome::None),
        }
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Builder for submitting a new task. The gateway's public input type.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub payload: serde_json::Value,
    pub parameters: Option<serde_json::Value>,
}

impl NewTask {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            parameters: None,
        }
    }

    pub fn parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// What a successful submission hands back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub task_id: TaskId,
    pub correlation: Uuid,
}
