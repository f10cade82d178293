//! Message broker: durable queue carrying dispatch notices to workers.
//!
//! Required contract for implementations: durability across restarts,
//! at-least-once delivery, per-message acknowledgment, automatic
//! redelivery of an unacknowledged message after its visibility timeout,
//! and a single active (unacknowledged) delivery of a given message at a
//! time. Consumers must tolerate duplicates — the store-side
//! compare-and-swap guard neutralizes them.

pub mod pgmq;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::DispatchMessage;

pub use pgmq::PgmqBroker;

/// One in-flight delivery of a dispatch message.
///
/// The body is kept as raw JSON; the worker parses the
/// [`DispatchMessage`] out of it so a poisoned body can be dropped
/// without losing the receipt needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-side receipt identifying this message for acknowledgment.
    pub receipt: i64,
    /// How many times this message has been delivered (1 = first).
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

/// Dispatch-notice queue, injected into the gateway and workers.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a dispatch message. Durable once this returns Ok.
    async fn publish(&self, msg: &DispatchMessage) -> Result<()>;

    /// Receive the next message, hiding it from other consumers for
    /// `visibility_timeout_secs`. `None` when the queue is empty.
    async fn receive(&self, visibility_timeout_secs: i32) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery. The message ceases to exist; it will never
    /// be redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}
