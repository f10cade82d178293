//! # taskrelay
//!
//! Durable task lifecycle and dispatch engine over Postgres and pgmq.
//!
//! Tasks are persisted with a closed pending/processing/completed/failed
//! state machine, dispatched through an at-least-once queue, and executed
//! by independent workers whose compare-and-swap claim makes duplicate
//! deliveries harmless. Store and broker are explicit injected interfaces,
//! never ambient globals, so tests substitute in-process fakes.

pub mod broker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod worker;
