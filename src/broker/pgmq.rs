//! pgmq-backed broker via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive. Acknowledgment archives the message, which preserves it
//! for queue-level audit while removing it from delivery forever.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use sqlx::PgPool;

use crate::error::{Error, Result};
use crate::model::DispatchMessage;
use crate::telemetry::metrics;

use super::{Broker, Delivery};

/// Broker over a pgmq queue, sharing the store's connection pool.
#[derive(Clone)]
pub struct PgmqBroker {
    pool: PgPool,
    queue_name: String,
}

impl PgmqBroker {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    /// Create the underlying pgmq queue (idempotent).
    pub async fn create_queue(&self) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.queue_name.clone()),
                KeyValue::new("operation", "create"),
            ],
        );
        Ok(())
    }
}

#[async_trait]
impl Broker for PgmqBroker {
    async fn publish(&self, msg: &DispatchMessage) -> Result<()> {
        let body = serde_json::to_value(msg)
            .map_err(|e| Error::Broker(format!("dispatch message encode: {e}")))?;
        let _msg_id: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(&self.queue_name)
            .bind(&body)
            .bind(0i32)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.queue_name.clone()),
                KeyValue::new("operation", "send"),
            ],
        );
        Ok(())
    }

    async fn receive(&self, visibility_timeout_secs: i32) -> Result<Option<Delivery>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(&self.queue_name)
        .bind(visibility_timeout_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Broker(e.to_string()))?;

        let delivery = row.map(|(receipt, read_count, enqueued_at, body)| Delivery {
            receipt,
            read_count,
            enqueued_at,
            body,
        });

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.queue_name.clone()),
                KeyValue::new(
                    "operation",
                    if delivery.is_some() { "read" } else { "read_empty" },
                ),
            ],
        );

        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(&self.queue_name)
            .bind(delivery.receipt)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.queue_name.clone()),
                KeyValue::new("operation", "archive"),
            ],
        );
        Ok(())
    }
}
