//! taskrelay CLI — operator interface to the dispatch engine.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use taskrelay::broker::PgmqBroker;
use taskrelay::config::Config;
use taskrelay::gateway::{GatewayConfig, SubmissionGateway};
use taskrelay::model::{NewTask, TaskId};
use taskrelay::store::PgTaskStore;
use taskrelay::telemetry::{TelemetryConfig, init_telemetry};
use taskrelay::worker::{ExecutionEngine, Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "taskrelay", about = "Durable task lifecycle and dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker pool and recovery sweep
    Serve {
        /// Number of worker instances to run
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
    /// Submit a new task
    Submit {
        /// JSON payload
        payload: String,
        /// Optional JSON execution parameters
        #[arg(long)]
        parameters: Option<String>,
    },
    /// Show a task's status, outcome, and audit trail
    Show {
        /// Task ID
        id: String,
    },
    /// Run one recovery pass over stale pending tasks
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { workers } => cmd_serve(config, workers).await,
        Command::Submit {
            payload,
            parameters,
        } => {
            let gateway = gateway_from(&config).await?;
            cmd_submit(&gateway, payload, parameters).await
        }
        Command::Show { id } => {
            let gateway = gateway_from(&config).await?;
            cmd_show(&gateway, id).await
        }
        Command::Sweep => {
            let gateway = gateway_from(&config).await?;
            let published = gateway.sweep_once().await?;
            println!("re-dispatched {published} task(s)");
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<(Arc<PgTaskStore>, Arc<PgmqBroker>)> {
    let store = PgTaskStore::connect(config.database_url.expose_secret()).await?;
    store.migrate().await?;
    let broker = PgmqBroker::new(store.pool(), config.queue_name.clone());
    broker.create_queue().await?;
    Ok((Arc::new(store), Arc::new(broker)))
}

async fn gateway_from(config: &Config) -> anyhow::Result<SubmissionGateway> {
    let (store, broker) = connect(config).await?;
    Ok(SubmissionGateway::new(
        store,
        broker,
        GatewayConfig {
            max_payload_bytes: config.max_payload_bytes,
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs),
            pending_redispatch: chrono::Duration::seconds(config.pending_redispatch_secs),
        },
    ))
}

/// Built-in engine: echoes the payload back as the result.
///
/// The serve command ships without an external execution backend; every
/// task completes with its own payload echoed, exercising the full
/// lifecycle end to end.
struct EchoEngine;

#[async_trait::async_trait]
impl ExecutionEngine for EchoEngine {
    async fn execute(
        &self,
        payload: &serde_json::Value,
        _parameters: Option<&serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({ "echo": payload }))
    }
}

async fn cmd_serve(config: Config, workers: usize) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "taskrelay".to_string(),
    })?;

    let (store, broker) = connect(&config).await?;
    let engine: Arc<dyn ExecutionEngine> = Arc::new(EchoEngine);

    let gateway = Arc::new(SubmissionGateway::new(
        store.clone(),
        broker.clone(),
        GatewayConfig {
            max_payload_bytes: config.max_payload_bytes,
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs),
            pending_redispatch: chrono::Duration::seconds(config.pending_redispatch_secs),
        },
    ));

    let worker_config = WorkerConfig {
        visibility_timeout_secs: config.visibility_timeout_secs,
        poll_interval: std::time::Duration::from_secs(config.poll_interval_secs),
        max_error_len: config.max_error_len,
    };

    let mut pool = Vec::new();
    for n in 0..workers {
        let worker = Arc::new(Worker::new(
            format!("worker-{n}"),
            store.clone(),
            broker.clone(),
            engine.clone(),
            worker_config.clone(),
        ));
        pool.push(worker);
    }

    // Ctrl-C stops the sweep and every worker after its in-flight task
    {
        let gateway = gateway.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            gateway.shutdown();
            for worker in &pool {
                worker.shutdown();
            }
        });
    }

    let mut handles = Vec::new();
    for worker in &pool {
        let worker = worker.clone();
        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    gateway.run_sweep().await?;
    for handle in handles {
        handle.await??;
    }
    Ok(())
}

async fn cmd_submit(
    gateway: &SubmissionGateway,
    payload: String,
    parameters: Option<String>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&payload)?;
    let mut new = NewTask::new(payload);
    if let Some(raw) = parameters {
        new = new.parameters(serde_json::from_str(&raw)?);
    }

    let receipt = gateway.submit(new).await?;
    println!("Submitted: {}", receipt.task_id.0);
    println!("Correlation: {}", receipt.correlation);
    Ok(())
}

async fn cmd_show(gateway: &SubmissionGateway, id: String) -> anyhow::Result<()> {
    let id = TaskId(uuid::Uuid::parse_str(&id)?);

    let task = gateway.status(id).await?;
    println!("ID:         {}", task.id.0);
    println!("Status:     {}", task.status);
    println!("Submitted:  {}", task.submitted_at);
    if let Some(completed) = task.completed_at {
        println!("Completed:  {completed}");
    }
    println!("Payload:    {}", serde_json::to_string_pretty(&task.payload)?);
    if let Some(ref parameters) = task.parameters {
        println!("Parameters: {}", serde_json::to_string_pretty(parameters)?);
    }
    if let Some(ref result) = task.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    if let Some(ref error) = task.error_message {
        println!("Error:      {error}");
    }

    println!("---");
    for entry in gateway.history(id).await? {
        println!(
            "{}  {:<10}  {}",
            entry.changed_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.status,
            entry.notes.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
