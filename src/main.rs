use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use trading_ai::api::{ApiServer, AppState};
use trading_ai::config::Settings;
use trading_ai::db::PostgresPersistence;
use trading_ai::queue::{Broker, MemoryBroker, PeriodicScheduler, RedisBroker, TaskQueue, WorkerPool};
use trading_ai::tasks::{TaskArgs, TaskContext, TaskRegistry};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "trading-ai", version, about = "Trading AI backend: HTTP API, task workers and scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// API server, workers and periodic scheduler in one process (default)
    Run,
    /// HTTP API only
    Serve,
    /// Workers and periodic scheduler only
    Worker,
    /// Enqueue a task by name
    Enqueue {
        task: String,
        /// Positional arguments as a JSON array
        #[arg(long)]
        args: Option<String>,
        /// Keyword arguments as a JSON object
        #[arg(long)]
        kwargs: Option<String>,
        /// Wait up to this many seconds for a terminal state
        #[arg(long)]
        wait: Option<u64>,
    },
    /// List registered tasks and their retry policies
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load().context("Failed to load settings")?;
    setup_logging(&settings);

    let settings = Arc::new(settings);
    let registry = Arc::new(TaskRegistry::with_builtin_tasks(&settings));

    match cli.command.unwrap_or(Command::Run) {
        Command::Tasks => {
            for info in registry.list() {
                println!(
                    "{:<28} retry after {:>4}s, max {} retries",
                    info.name, info.retry_delay_secs, info.max_retries
                );
            }
            Ok(())
        }
        Command::Enqueue {
            task,
            args,
            kwargs,
            wait,
        } => {
            if settings.uses_memory_broker() {
                anyhow::bail!(
                    "enqueue needs a shared broker: REDIS_URL is {}, which only lives inside one process; \
                     point REDIS_URL at Redis or use POST /api/tasks/{} on a running server",
                    settings.redis_url,
                    task
                );
            }
            let queue = TaskQueue::new(connect_broker(&settings).await?, registry);
            enqueue(&queue, &settings, &task, args, kwargs, wait).await
        }
        Command::Serve => {
            let queue = TaskQueue::new(connect_broker(&settings).await?, registry);
            run_services(settings, queue, true, false).await
        }
        Command::Worker => {
            let queue = TaskQueue::new(connect_broker(&settings).await?, registry);
            run_services(settings, queue, false, true).await
        }
        Command::Run => {
            let queue = TaskQueue::new(connect_broker(&settings).await?, registry);
            run_services(settings, queue, true, true).await
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_to_postgres(settings: &Settings) -> Option<PostgresPersistence> {
    match PostgresPersistence::new(&settings.database_url).await {
        Ok(p) => {
            tracing::info!("Postgres persistence enabled at {}", settings.database_url);
            Some(p)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without persistence",
                e
            );
            None
        }
    }
}

async fn connect_broker(settings: &Settings) -> anyhow::Result<Arc<dyn Broker>> {
    if settings.uses_memory_broker() {
        tracing::info!("Using in-process task broker");
        return Ok(Arc::new(MemoryBroker::new(Duration::from_secs(
            settings.task_record_ttl_secs,
        ))));
    }

    let broker = RedisBroker::new(
        &settings.redis_url,
        &settings.queue_name,
        settings.task_record_ttl_secs,
    )
    .await
    .with_context(|| format!("Failed to connect to broker at {}", settings.redis_url))?;

    Ok(Arc::new(broker))
}

// ============================================================================
// Commands
// ============================================================================

async fn enqueue(
    queue: &TaskQueue,
    settings: &Settings,
    task: &str,
    args: Option<String>,
    kwargs: Option<String>,
    wait: Option<u64>,
) -> anyhow::Result<()> {
    let args = TaskArgs {
        args: match args {
            Some(raw) => serde_json::from_str::<Vec<Value>>(&raw).context("--args must be a JSON array")?,
            None => Vec::new(),
        },
        kwargs: match kwargs {
            Some(raw) => {
                serde_json::from_str::<Map<String, Value>>(&raw).context("--kwargs must be a JSON object")?
            }
            None => Map::new(),
        },
    };

    let handle = queue.enqueue(task, args).await?;
    println!("{}", serde_json::to_string_pretty(&handle)?);

    if let Some(secs) = wait {
        let record = queue
            .wait(&handle, Duration::from_secs(secs), settings.broker_poll_interval())
            .await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    Ok(())
}

async fn run_services(
    settings: Arc<Settings>,
    queue: TaskQueue,
    serve_api: bool,
    run_workers: bool,
) -> anyhow::Result<()> {
    tracing::info!(
        version = %settings.app_version,
        demo_mode = settings.demo_mode,
        "Trading AI starting"
    );

    if settings.uses_memory_broker() && serve_api != run_workers {
        tracing::warn!("In-process broker is not shared between processes; run both API and workers here");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if run_workers {
        let recovered = queue
            .broker()
            .recover_in_flight()
            .await
            .context("Failed to recover unacknowledged tasks")?;
        if recovered > 0 {
            tracing::warn!(recovered, "Requeued tasks left in flight by a previous worker");
        }

        let db = connect_to_postgres(&settings).await;
        let ctx = Arc::new(TaskContext::new(settings.clone(), db));

        let pool = WorkerPool::new(
            &queue,
            ctx,
            settings.worker_concurrency,
            settings.broker_poll_interval(),
        );
        handles.extend(pool.spawn(shutdown_rx.clone()));

        let scheduler = PeriodicScheduler::with_default_entries(queue.clone(), &settings)?;
        handles.extend(scheduler.spawn(shutdown_rx.clone()));

        tracing::info!(
            workers = settings.worker_concurrency,
            tasks = queue.registry().len(),
            "Workers and scheduler started"
        );
    }

    let server = if serve_api {
        let server = ApiServer::new(AppState::new(settings.clone(), queue.clone()))?;
        Some(tokio::spawn(server.run(shutdown_rx.clone())))
    } else {
        None
    };

    let server_result = match server {
        Some(mut server) => {
            let exited_early = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down...");
                    None
                }
                result = &mut server => Some(result),
            };
            let _ = shutdown_tx.send(true);

            // A finished JoinHandle must not be polled again
            let result = match exited_early {
                Some(result) => result,
                None => server.await,
            };
            let result = result.context("API server task failed").and_then(|served| served);
            if let Err(e) = &result {
                tracing::error!("API server exited: {:#}", e);
            }
            result
        }
        None => {
            tokio::signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    };

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Background loop failed: {}", e);
        }
    }

    tracing::info!("Trading AI stopped");
    server_result
}
