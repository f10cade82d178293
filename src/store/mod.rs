//! Task store: durable record of tasks and their transition history.
//!
//! The store is the single source of truth for task state. All mutation
//! goes through [`TaskStore::transition`], a compare-and-swap on status
//! that commits the new status, its outcome fields, and one audit row
//! atomically. That guard — not any external lock — is the system's only
//! concurrency-control mechanism.

pub mod postgres;

use async_trait::async_trait;
use chrono::Duration;

use crate::error::Result;
use crate::model::{NewTask, Outcome, StatusHistoryEntry, Task, TaskId, TaskStatus};

pub use postgres::PgTaskStore;

/// Durable task storage, injected into the gateway and workers.
///
/// Implementations must make `insert` and `transition` atomic: a task row
/// and its history entry either both commit or neither does.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task in `pending` together with its initial history
    /// entry. Exactly one row exists per successful call.
    async fn insert(&self, new: NewTask) -> Result<Task>;

    /// Fetch a task by id. `Error::NotFound` for unknown ids.
    async fn get(&self, id: TaskId) -> Result<Task>;

    /// Fetch a task's audit trail, oldest first.
    async fn history(&self, id: TaskId) -> Result<Vec<StatusHistoryEntry>>;

    /// Compare-and-swap status transition.
    ///
    /// Succeeds only if the stored status equals `from`; any mismatch
    /// returns `Error::Conflict` and leaves state untouched. A pair not in
    /// the state machine table is rejected outright with
    /// `Error::InvalidTransition`. On success the status, outcome fields,
    /// and a new history entry commit in one atomic operation.
    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        outcome: Outcome,
        notes: Option<&str>,
    ) -> Result<Task>;

    /// Tasks still `pending` after `older_than`. Feeds the recovery sweep,
    /// which re-publishes dispatch messages for them.
    async fn stale_pending(&self, older_than: Duration) -> Result<Vec<TaskId>>;
}

/// Shared pre-flight checks for `transition` implementations: the pair
/// must be in the state machine table and the outcome must match the
/// target status.
pub fn validate_transition(from: TaskStatus, to: TaskStatus, outcome: &Outcome) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(crate::error::Error::InvalidTransition { from, to });
    }
    if !outcome.matches(to) {
        return Err(crate::error::Error::InvalidTransition { from, to });
    }
    Ok(())
}
