//! In-process fakes for the injected store and broker interfaces, plus
//! scripted execution engines. These let lifecycle tests run the real
//! gateway and worker code without Postgres.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use taskrelay::broker::{Broker, Delivery};
use taskrelay::error::{Error, Result};
use taskrelay::model::{
    DispatchMessage, NewTask, Outcome, StatusHistoryEntry, Task, TaskId, TaskStatus,
};
use taskrelay::store::{TaskStore, validate_transition};
use taskrelay::worker::ExecutionEngine;

// ---------------------------------------------------------------------------
// Store fake
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    tasks: HashMap<Uuid, Task>,
    history: Vec<StatusHistoryEntry>,
    last_change: HashMap<Uuid, DateTime<Utc>>,
}

/// In-memory task store with the same atomicity and CAS semantics as the
/// Postgres implementation. Fault flags inject store outages.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<StoreInner>,
    /// When set, `insert` fails and persists nothing.
    pub fail_inserts: AtomicBool,
    /// When set, every `transition` fails before touching state.
    pub fail_transitions: AtomicBool,
    /// When set, only terminal transitions fail — the claim still commits,
    /// which is the worker-crashed-at-commit shape.
    pub fail_terminal: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    /// Strictly-increasing per-task timestamps, even inside one tick.
    fn next_change_at(inner: &mut StoreInner, id: Uuid) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = inner.last_change.get(&id)
            && now <= *last
        {
            now = *last + Duration::microseconds(1);
        }
        inner.last_change.insert(id, now);
        now
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, new: NewTask) -> Result<Task> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Store("injected store outage".to_string()));
        }

        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        let now = Self::next_change_at(&mut inner, id);
        let task = Task {
            id: TaskId(id),
            payload: new.payload,
            parameters: new.parameters,
            status: TaskStatus::Pending,
            submitted_at: now,
            completed_at: None,
            result: None,
            error_message: None,
        };
        inner.tasks.insert(id, task.clone());
        inner.history.push(StatusHistoryEntry {
            task_id: TaskId(id),
            status: TaskStatus::Pending,
            changed_at: now,
            notes: Some("submitted".to_string()),
        });
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get(&id.0)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    async fn history(&self, id: TaskId) -> Result<Vec<StatusHistoryEntry>> {
        let inner = self.inner.lock().unwrap();
        if !inner.tasks.contains_key(&id.0) {
            return Err(Error::NotFound(format!("task {id}")));
        }
        let mut entries: Vec<_> = inner
            .history
            .iter()
            .filter(|e| e.task_id == id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.changed_at);
        Ok(entries)
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
        if self.fail_transitions.load(Ordering::SeqCst)
            || (to.is_terminal() && self.fail_terminal.load(Ordering::SeqCst))
        {
            return Err(Error::Store("injected store outage".to_string()));
        }

        let mut inner = self.inner.lock().unwrap();
        let actual = inner
            .tasks
            .get(&id.0)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?
            .status;
        if actual != from {
            return Err(Error::Conflict {
                expected: from,
                actual,
            });
        }

        let now = Self::next_change_at(&mut inner, id.0);
        let task = inner.tasks.get_mut(&id.0).unwrap();
        task.status = to;
        if to.is_terminal() {
            task.completed_at = Some(now);
        }
        match outcome {
            Outcome::Result(data) => task.result = Some(data),
            Outcome::Error(message) => task.error_message = Some(message),
            Outcome::None => {}
        }
        let task = task.clone();
        inner.history.push(StatusHistoryEntry {
            task_id: id,
            status: to,
            changed_at: now,
            notes: notes.map(|s| s.to_string()),
        });
        Ok(task)
    }

    async fn stale_pending(&self, older_than: Duration) -> Result<Vec<TaskId>> {
        let cutoff = Utc::now() - older_than;
        let inner = self.inner.lock().unwrap();
        let mut stale: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.submitted_at < cutoff)
            .map(|t| (t.submitted_at, t.id))
            .collect();
        stale.sort_by_key(|(at, _)| *at);
        Ok(stale.into_iter().map(|(_, id)| id).collect())
    }
}

// ---------------------------------------------------------------------------
// Broker fake
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StoredMessage {
    receipt: i64,
    read_count: i32,
    enqueued_at: DateTime<Utc>,
    body: serde_json::Value,
}

#[derive(Default)]
struct BrokerInner {
    next_receipt: i64,
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<i64, StoredMessage>,
}

/// In-memory broker honoring the at-least-once contract: a received
/// message sits in-flight until acknowledged, and tests drive visibility
/// timeout expiry explicitly via [`MemoryBroker::redeliver_unacked`].
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<BrokerInner>,
    /// When set, `publish` fails (broker outage after store commit).
    pub fail_publish: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_len(&self) -> usize {
        self.inner.lock().unwrap().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }

    /// Simulate visibility timeout expiry: every unacknowledged delivery
    /// becomes deliverable again.
    pub fn redeliver_unacked(&self) {
        let mut inner = self.inner.lock().unwrap();
        let receipts: Vec<_> = inner.in_flight.keys().copied().collect();
        for receipt in receipts {
            let msg = inner.in_flight.remove(&receipt).unwrap();
            inner.ready.push_back(msg);
        }
    }

    /// Enqueue a raw body, bypassing DispatchMessage encoding. For
    /// poison-message tests.
    pub fn inject_raw(&self, body: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_receipt += 1;
        let msg = StoredMessage {
            receipt: inner.next_receipt,
            read_count: 0,
            enqueued_at: Utc::now(),
            body,
        };
        inner.ready.push_back(msg);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, msg: &DispatchMessage) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Broker("injected broker outage".to_string()));
        }
        let body =
            serde_json::to_value(msg).map_err(|e| Error::Broker(format!("encode: {e}")))?;
        self.inject_raw(body);
        Ok(())
    }

    async fn receive(&self, _visibility_timeout_secs: i32) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(mut msg) = inner.ready.pop_front() else {
            return Ok(None);
        };
        msg.read_count += 1;
        let delivery = Delivery {
            receipt: msg.receipt,
            read_count: msg.read_count,
            enqueued_at: msg.enqueued_at,
            body: msg.body.clone(),
        };
        inner.in_flight.insert(msg.receipt, msg);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .in_flight
            .remove(&delivery.receipt);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted engines
// ---------------------------------------------------------------------------

/// Succeeds with `{"echo": <payload>}`, counting invocations.
#[derive(Default)]
pub struct EchoEngine {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ExecutionEngine for EchoEngine {
    async fn execute(
        &self,
        payload: &serde_json::Value,
        _parameters: Option<&serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "echo": payload }))
    }
}

/// Always fails with the given message.
pub struct FailEngine {
    pub message: String,
}

impl FailEngine {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl ExecutionEngine for FailEngine {
    async fn execute(
        &self,
        _payload: &serde_json::Value,
        _parameters: Option<&serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("{}", self.message)
    }
}
