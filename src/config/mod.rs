//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// pgmq queue carrying dispatch messages.
    pub queue_name: String,
    /// Visibility timeout (seconds) for broker reads; an unacknowledged
    /// delivery reappears after this long.
    pub visibility_timeout_secs: i32,
    /// Worker poll interval when the queue is empty.
    pub poll_interval_secs: u64,
    /// How often the recovery sweep runs.
    pub sweep_interval_secs: u64,
    /// A task still pending after this long is considered orphaned and
    /// re-dispatched by the sweep.
    pub pending_redispatch_secs: i64,
    /// Reject submissions whose serialized payload exceeds this many bytes.
    pub max_payload_bytes: usize,
    /// Captured execution error messages are truncated to this length.
    pub max_error_len: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            queue_name: optional_var("TASK_QUEUE_NAME", "task_dispatch"),
            visibility_timeout_secs: parsed_var("VISIBILITY_TIMEOUT_SECS", 60)?,
            poll_interval_secs: parsed_var("POLL_INTERVAL_SECS", 5)?,
            sweep_interval_secs: parsed_var("SWEEP_INTERVAL_SECS", 60)?,
            pending_redispatch_secs: parsed_var("PENDING_REDISPATCH_SECS", 300)?,
            max_payload_bytes: parsed_var("MAX_PAYLOAD_BYTES", 256 * 1024)?,
            max_error_len: parsed_var("MAX_ERROR_LEN", 4096)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: optional_var("LOG_LEVEL", "info"),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{name} is not a valid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
