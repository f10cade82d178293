//! Postgres-backed task store via SQLx.
//!
//! One row per task plus an append-only `task_status_history` row per
//! transition. The compare-and-swap lives in the `WHERE id = $n AND
//! status = $n` clause of the UPDATE; a zero row count means another
//! actor already moved the task.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{NewTask, Outcome, StatusHistoryEntry, Task, TaskId, TaskStatus};
use crate::telemetry::metrics;

use super::{TaskStore, validate_transition};

/// Task store over a shared Postgres connection pool.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (shared with the pgmq broker).
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Store(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a clone of the connection pool (the broker shares it).
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, new: NewTask) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO tasks (id, payload, parameters, status, submitted_at)
             VALUES ($1, $2, $3, 'pending', $4)",
        )
        .bind(id)
        .bind(&new.payload)
        .bind(&new.parameters)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO task_status_history (task_id, status, changed_at, notes)
             VALUES ($1, 'pending', $2, 'submitted')",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Task {
            id: TaskId(id),
            payload: new.payload,
            parameters: new.parameters,
            status: TaskStatus::Pending,
            submitted_at: now,
            completed_at: None,
            result: None,
            error_message: None,
        })
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT id, payload, parameters, status, submitted_at, completed_at, result, error_message
             FROM tasks WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .try_into_task()
    }

    async fn history(&self, id: TaskId) -> Result<Vec<StatusHistoryEntry>> {
        let rows: Vec<(Uuid, String, DateTime<Utc>, Option<String>)> = sqlx::query_as(
            "SELECT task_id, status, changed_at, notes
             FROM task_status_history WHERE task_id = $1
             ORDER BY changed_at, id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            // No history means no task: the initial entry commits with the row.
            return Err(Error::NotFound(format!("task {id}")));
        }

        rows.into_iter()
            .map(|(task_id, status, changed_at, notes)| {
                Ok(StatusHistoryEntry {
                    task_id: TaskId(task_id),
                    status: status.parse()?,
                    changed_at,
                    notes,
                })
            })
            .collect()
    }

    async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        outcome: Outcome,
        notes: Option<&str>,
    ) -> Result<Task> {
        validate_transition(from, to, &outcome)?;

        let now = Utc::now();
        let completed_at = to.is_terminal().then_some(now);
        let (result, error_message) = match &outcome {
            Outcome::Result(data) => (Some(data.clone()), None),
            Outcome::Error(msg) => (None, Some(msg.clone())),
            Outcome::None => (None, None),
        };

        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            "UPDATE tasks
             SET status = $1, completed_at = $2, result = $3, error_message = $4
             WHERE id = $5 AND status = $6",
        )
        .bind(to.to_string())
        .bind(completed_at)
        .bind(&result)
        .bind(&error_message)
        .bind(id.0)
        .bind(from.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.rollback().await?;
            // Distinguish a missing task from a lost CAS race.
            let actual: Option<(String,)> =
                sqlx::query_as("SELECT status FROM tasks WHERE id = $1")
                    .bind(id.0)
                    .fetch_optional(&self.pool)
                    .await?;
            return match actual {
                Some((status,)) => Err(Error::Conflict {
                    expected: from,
                    actual: status.parse()?,
                }),
                None => Err(Error::NotFound(format!("task {id}"))),
            };
        }

        sqlx::query(
            "INSERT INTO task_status_history (task_id, status, changed_at, notes)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id.0)
        .bind(to.to_string())
        .bind(now)
        .bind(notes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        metrics::task_state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );

        self.get(id).await
    }

    async fn stale_pending(&self, older_than: Duration) -> Result<Vec<TaskId>> {
        let cutoff = Utc::now() - older_than;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM tasks
             WHERE status = 'pending' AND submitted_at < $1
             ORDER BY submitted_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| TaskId(id)).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    payload: serde_json::Value,
    parameters: Option<serde_json::Value>,
    status: String,
    submitted_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
}

impl TaskRow {
    fn try_into_task(self) -> Result<Task> {
        Ok(Task {
            id: TaskId(self.id),
            payload: self.payload,
            parameters: self.parameters,
            status: self.status.parse()?,
            submitted_at: self.submitted_at,
            completed_at: self.completed_at,
            result: self.result,
            error_message: self.error_message,
        })
    }
}
