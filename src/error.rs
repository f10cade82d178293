//! Error types for taskrelay.

use thiserror::Error;

use crate::model::TaskStatus;

#[derive(Debug, Error)]
pub enum Error {
    /// Structurally invalid submission. Nothing was persisted.
    #[error("invalid submission: {0}")]
    Validation(String),

    /// Query against an unknown task id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Compare-and-swap transition found a different stored status.
    /// Internal-only: the consumer resolves this by discarding the
    /// duplicate delivery, it is never surfaced to a client.
    #[error("status conflict: expected {expected}, found {actual}")]
    Conflict {
        expected: TaskStatus,
        actual: TaskStatus,
    },

    /// Transition pair not in the state machine table.
    #[error("transition {from} -> {to} is not defined")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// Execution engine failure on an otherwise valid task.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Transient store fault. On submission the call fails visibly; on a
    /// worker-side commit the delivery is left unacknowledged for
    /// broker-driven redelivery.
    #[error("store error: {0}")]
    Store(String),

    /// Broker fault. After a successful store commit the task stays
    /// pending and the recovery sweep re-dispatches it.
    #[error("broker error: {0}")]
    Broker(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl Error {
    /// True for the internal duplicate-delivery signals the worker
    /// acknowledges and discards.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. } | Error::InvalidTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
