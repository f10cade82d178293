//! Worker consumption loop: claim, execute, commit, acknowledge.
//!
//! Each worker processes exactly one task end-to-end before requesting the
//! next. Correctness under at-least-once delivery comes from the pairing
//! of broker redelivery with the store's compare-and-swap claim: a
//! duplicate delivery loses the pending→processing swap and is discarded,
//! and an unacknowledged message reappears after its visibility timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::error::{Error, Result};
use crate::model::{DispatchMessage, Outcome, TaskStatus};
use crate::store::TaskStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

/// External collaborator performing the task's actual computation.
///
/// The core treats it as a pure black box: any `Ok` is success, any `Err`
/// is captured (message verbatim, truncated to the configured cap) into
/// the task's failed state. The call is unbounded and blocking — no
/// timeout is enforced here; a hung engine occupies its worker's slot.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        payload: &serde_json::Value,
        parameters: Option<&serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Configuration for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Visibility timeout (seconds) for broker reads.
    pub visibility_timeout_secs: i32,
    /// Poll interval when the queue is empty.
    pub poll_interval: std::time::Duration,
    /// Captured execution errors are truncated to this many chars.
    pub max_error_len: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 60,
            poll_interval: std::time::Duration::from_secs(5),
            max_error_len: 4096,
        }
    }
}

/// One consumer of the dispatch queue, concurrency 1.
pub struct Worker {
    name: String,
    store: Arc<dyn TaskStore>,
    broker: Arc<dyn Broker>,
    engine: Arc<dyn ExecutionEngine>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    stopping: AtomicBool,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn TaskStore>,
        broker: Arc<dyn Broker>,
        engine: Arc<dyn ExecutionEngine>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            broker,
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: AtomicBool::new(false),
        }
    }

    /// Signal the worker to shut down after the in-flight task.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Run the consumption loop until shutdown.
    ///
    /// Infrastructure faults are logged and retried on the next poll; they
    /// never kill the loop. A failed task is a normal outcome, not an
    /// outage signal.
    pub async fn run(&self) -> Result<()> {
        info!(worker = %self.name, "worker started");
        loop {
            // Checked between messages too, so a busy queue cannot delay
            // shutdown past the in-flight task.
            if self.stopping.load(Ordering::SeqCst) {
                info!(worker = %self.name, "worker shutting down");
                return Ok(());
            }

            match self.process_next().await {
                // Drained a message; immediately try for the next one.
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(worker = %self.name, "delivery processing error: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(worker = %self.name, "worker shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Handle at most one delivery end-to-end. Returns whether a message
    /// was received.
    ///
    /// An `Err` from this method means the delivery (if any) was left
    /// unacknowledged on purpose: the broker will redeliver it after the
    /// visibility timeout, and the claim guard makes the retry safe.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(delivery) = self
            .broker
            .receive(self.config.visibility_timeout_secs)
            .await?
        else {
            return Ok(false);
        };

        // A body that doesn't parse can never reference a task; drop it.
        let msg: DispatchMessage = match serde_json::from_value(delivery.body.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(worker = %self.name, receipt = delivery.receipt,
                    "malformed dispatch message, discarding: {e}");
                self.broker.ack(&delivery).await?;
                return Ok(true);
            }
        };

        let span = start_task_span(&self.name, &msg.task_id.0);
        self.handle_dispatch(&msg, &delivery)
            .instrument(span)
            .await?;
        Ok(true)
    }

    async fn handle_dispatch(&self, msg: &DispatchMessage, delivery: &Delivery) -> Result<()> {
        let span = tracing::Span::current();

        // 1. Fetch. A missing task means there is nothing to do and
        //    nothing to retry.
        let task = match self.store.get(msg.task_id).await {
            Ok(task) => task,
            Err(Error::NotFound(_)) => {
                info!(id = %msg.task_id, "dispatch for unknown task, discarding");
                self.broker.ack(delivery).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // 2. Claim. Losing the swap means another delivery of this task
        //    was already handled — the idempotency guard under
        //    at-least-once delivery.
        match self
            .store
            .transition(
                task.id,
                TaskStatus::Pending,
                TaskStatus::Processing,
                Outcome::None,
                Some(&format!("claimed by {}", self.name)),
            )
            .await
        {
            Ok(_) => record_state_transition(&span, "pending", "processing"),
            Err(e) if e.is_conflict() => {
                debug!(id = %task.id, read_count = delivery.read_count,
                    "duplicate delivery, discarding: {e}");
                self.broker.ack(delivery).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // 3. Execute. Unbounded; the engine owns the clock from here.
        let started = Instant::now();
        let execution = self
            .engine
            .execute(&task.payload, task.parameters.as_ref())
            .await;
        let duration_ms = started.elapsed().as_millis() as f64;
        metrics::execution_duration_ms().record(
            duration_ms,
            &[KeyValue::new(
                "result",
                if execution.is_ok() { "ok" } else { "error" },
            )],
        );

        // 4. Commit the terminal state. An engine error is terminal for
        //    the task but not for this worker.
        let committed = match execution {
            Ok(result) => {
                record_state_transition(&span, "processing", "completed");
                self.store
                    .transition(
                        task.id,
                        TaskStatus::Processing,
                        TaskStatus::Completed,
                        Outcome::Result(result),
                        None,
                    )
                    .await
            }
            Err(e) => {
                let message = truncate_error(&format!("{e:#}"), self.config.max_error_len);
                record_state_transition(&span, "processing", "failed");
                warn!(id = %task.id, duration_ms, "execution failed: {message}");
                self.store
                    .transition(
                        task.id,
                        TaskStatus::Processing,
                        TaskStatus::Failed,
                        Outcome::Error(message),
                        None,
                    )
                    .await
            }
        };

        match committed {
            Ok(task) => {
                info!(id = %task.id, status = %task.status, duration_ms, "task retired");
            }
            Err(e) if e.is_conflict() => {
                // Someone else retired the task between our claim and
                // commit; their terminal state stands.
                warn!(id = %task.id, "terminal transition lost: {e}");
            }
            // Store fault: leave the message unacknowledged. Redelivery
            // after the visibility timeout re-runs the protocol, and the
            // claim guard makes it a no-op if our claim was recorded.
            Err(e) => return Err(e),
        }

        // 5. Acknowledge only after the terminal state is durable.
        if let Err(e) = self.broker.ack(delivery).await {
            // Redelivery of an already-terminal task is discarded in
            // step 2, so a lost ack costs one wasted delivery at most.
            warn!(id = %task.id, "ack failed: {e}");
        }
        Ok(())
    }
}

/// Cap a captured error message, marking the cut.
fn truncate_error(message: &str, max_len: usize) -> String {
    if message.chars().count() <= max_len {
        return message.to_string();
    }
    let mut out: String = message.chars().take(max_len).collect();
    out.push_str(" …[truncated]");
    out
}
