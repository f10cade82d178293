//! Submission gateway: validates and persists new tasks, then publishes a
//! dispatch notice, plus the recovery sweep that re-dispatches orphans.
//!
//! Ordering is the load-bearing part of `submit`: the task row and its
//! initial history entry commit first, and only then does the broker
//! publish happen. A store failure fails the call with nothing persisted;
//! a publish failure still reports success — the task is real and durable,
//! and the periodic sweep re-publishes for anything stuck in pending.

use std::sync::Arc;

use chrono::Duration;
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::model::{DispatchMessage, NewTask, StatusHistoryEntry, SubmitReceipt, Task, TaskId};
use crate::store::TaskStore;
use crate::telemetry::metrics;

/// Configuration for the gateway and its recovery sweep.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Reject submissions whose serialized payload exceeds this.
    pub max_payload_bytes: usize,
    /// How often the recovery sweep runs.
    pub sweep_interval: std::time::Duration,
    /// A task still pending after this long is re-dispatched.
    pub pending_redispatch: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 256 * 1024,
            sweep_interval: std::time::Duration::from_secs(60),
            pending_redispatch: Duration::seconds(300),
        }
    }
}

/// Client-facing entry point: submit and query tasks.
pub struct SubmissionGateway {
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    config: GatewayConfig,
    shutdown: Arc<Notify>,
}

impl SubmissionGateway {
    pub fn new(store: Arc<dyn TaskStore>, broker: Arc<dyn Broker>, config: GatewayConfig) -> Self {
        Self {
            store,
            broker,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Validate and persist a new task, then publish its dispatch notice.
    ///
    /// Structural validation happens before anything touches the store, so
    /// a `Validation` error guarantees no row exists and the client can
    /// retry without duplicate risk. Store errors likewise surface before
    /// any publish. A broker failure after the commit is swallowed: the
    /// task is durable and the sweep will dispatch it.
    pub async fn submit(&self, new: NewTask) -> Result<SubmitReceipt> {
        if let Err(e) = validate_payload(&new.payload, self.config.max_payload_bytes) {
            metrics::tasks_submitted().add(1, &[KeyValue::new("result", "invalid")]);
            return Err(e);
        }

        let task = self.store.insert(new).await.inspect_err(|_| {
            metrics::tasks_submitted().add(1, &[KeyValue::new("result", "store_error")]);
        })?;

        let msg = DispatchMessage::new(task.id);
        match self.broker.publish(&msg).await {
            Ok(()) => {
                info!(id = %task.id, correlation = %msg.correlation, "task submitted");
            }
            Err(e) => {
                // The task row is committed; dispatch is merely delayed
                // until the next sweep.
                warn!(id = %task.id, "dispatch publish failed, sweep will recover: {e}");
                metrics::dispatch_failures().add(1, &[]);
            }
        }

        metrics::tasks_submitted().add(1, &[KeyValue::new("result", "ok")]);
        Ok(SubmitReceipt {
            task_id: task.id,
            correlation: msg.correlation,
        })
    }

    /// Query a task's current state. `NotFound` for unknown ids.
    pub async fn status(&self, id: TaskId) -> Result<Task> {
        self.store.get(id).await
    }

    /// Query a task's audit trail, oldest entry first.
    pub async fn history(&self, id: TaskId) -> Result<Vec<StatusHistoryEntry>> {
        self.store.history(id).await
    }

    /// Signal the sweep loop to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the recovery sweep until shutdown.
    ///
    /// This loop is the sole mechanism preventing orphaned tasks after a
    /// broker-publish failure (or a crash between commit and publish).
    pub async fn run_sweep(&self) -> Result<()> {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "recovery sweep started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("recovery sweep shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
            }

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(n) => info!(count = n, "re-dispatched stale pending tasks"),
                Err(e) => error!("recovery sweep error: {e}"),
            }
        }
    }

    /// One recovery pass: re-publish a dispatch message for every task
    /// pending longer than the threshold. Returns how many were
    /// re-dispatched.
    ///
    /// Re-publishing for a task that already has a live message in the
    /// queue is harmless: the consumer's compare-and-swap guard turns the
    /// extra delivery into a no-op.
    pub async fn sweep_once(&self) -> Result<usize> {
        let stale = self
            .store
            .stale_pending(self.config.pending_redispatch)
            .await?;

        let mut published = 0;
        for id in stale {
            let msg = DispatchMessage::new(id);
            match self.broker.publish(&msg).await {
                Ok(()) => {
                    metrics::dispatch_recoveries().add(1, &[]);
                    published += 1;
                }
                Err(e) => {
                    // Broker still down; the task stays pending for the
                    // next pass.
                    warn!(id = %id, "sweep publish failed: {e}");
                }
            }
        }
        Ok(published)
    }
}

/// Structural payload validation. The engine never inspects payload
/// semantics; it only rejects shapes that cannot represent a submission.
fn validate_payload(payload: &serde_json::Value, max_bytes: usize) -> Result<()> {
    let obj = payload
        .as_object()
        .ok_or_else(|| Error::Validation("payload must be a JSON object".to_string()))?;
    if obj.is_empty() {
        return Err(Error::Validation(
            "payload must contain at least one field".to_string(),
        ));
    }
    let size = serde_json::to_vec(payload)
        .map_err(|e| Error::Validation(format!("payload is not serializable: {e}")))?
        .len();
    if size > max_bytes {
        return Err(Error::Validation(format!(
            "payload is {size} bytes, limit is {max_bytes}"
        )));
    }
    Ok(())
}
