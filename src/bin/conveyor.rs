//! The `conveyor` binary: enqueue, process, consume, supervise, and the
//! internal one-job worker entry used by the isolated transport.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::error;

use conveyor::bootstrap;
use conveyor::broker::{Broker, DisqueBroker};
use conveyor::call::WorkerRegistry;
use conveyor::config::ConfigManager;
use conveyor::consumer::Consumer;
use conveyor::job::{codec, Job};
use conveyor::logging::init_structured_logging;
use conveyor::producer::Producer;
use conveyor::shutdown::ShutdownToken;
use conveyor::supervise::Supervisor;

#[derive(Parser)]
#[command(name = "conveyor", version, about = "Job-queue control plane for Disque-style brokers")]
struct Cli {
    /// Configuration file (falls back to $CONVEYOR_CONFIG, then ./conveyor.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a job.
    Enqueue {
        #[arg(long)]
        queue: String,
        /// Job body as JSON.
        #[arg(long)]
        body: String,
        /// Override the queue's configured lifetime budget, in seconds.
        #[arg(long)]
        lifetime_seconds: Option<u64>,
    },
    /// Run one job through its worker synchronously, bypassing the broker.
    Process {
        #[arg(long)]
        queue: String,
        /// Job body as JSON.
        #[arg(long)]
        body: String,
    },
    /// Run a consumer loop over the given queues.
    Consume {
        /// Queue to consume from; repeatable. Defaults to every configured queue.
        #[arg(long = "queue")]
        queues: Vec<String>,
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// Exit after the first empty fetch instead of idling.
        #[arg(long)]
        burst: bool,
    },
    /// Run the supervisor: spawn and scale consumer processes.
    Supervise,
    /// Internal: run one registered worker for one job (isolated transport).
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        name: String,
        #[arg(long)]
        queue: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        metadata: String,
    },
}

/// In-process workers available to the `in-process` and
/// `isolated-subprocess` transports. Deployments embedding conveyor as a
/// library supply their own registry; the stock binary ships none.
fn worker_registry() -> Arc<WorkerRegistry> {
    Arc::new(WorkerRegistry::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let config = manager.shared();
    init_structured_logging(&config.logging);

    match cli.command {
        Command::Enqueue {
            queue,
            body,
            lifetime_seconds,
        } => {
            let body: serde_json::Value =
                serde_json::from_str(&body).context("--body must be valid JSON")?;
            let broker = connect(&config.broker.url).await?;
            let producer = Producer::new(broker, config);

            let id = match lifetime_seconds {
                Some(seconds) => {
                    producer
                        .enqueue_with_lifetime(&queue, body, Duration::from_secs(seconds))
                        .await?
                }
                None => producer.enqueue(&queue, body).await?,
            };
            println!("{id}");
        }

        Command::Process { queue, body } => {
            let body: serde_json::Value =
                serde_json::from_str(&body).context("--body must be valid JSON")?;
            let dispatcher = bootstrap::build_sync_dispatcher(config, worker_registry());
            let succeeded = dispatcher.dispatch_one(Job::new(queue, body)).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }

        Command::Consume {
            queues,
            batch_size,
            burst,
        } => {
            let queues = if queues.is_empty() {
                config.queue_names()
            } else {
                queues
            };
            if queues.is_empty() {
                bail!("no queues configured and none given with --queue");
            }

            let shutdown = ShutdownToken::new();
            shutdown
                .install_signal_handlers()
                .context("failed to install signal handlers")?;

            let broker = connect(&config.broker.url).await?;
            let dispatcher = bootstrap::build_dispatcher(
                Arc::clone(&broker),
                Arc::clone(&config),
                worker_registry(),
            );
            let mut consumer = Consumer::new(broker, dispatcher, &config, queues, batch_size, burst);
            consumer.run(&shutdown).await?;
        }

        Command::Supervise => {
            let broker = connect(&config.broker.url).await?;
            let supervisor = Supervisor::build(config, broker, cli.config)
                .context("invalid supervisor configuration")?;
            supervisor.run().await?;
        }

        Command::Worker {
            name,
            queue,
            body,
            metadata,
        } => {
            let body: serde_json::Value =
                serde_json::from_str(&body).context("--body must be valid JSON")?;
            let metadata =
                codec::decode_metadata(&metadata).context("--metadata must be valid JSON")?;

            let registry = worker_registry();
            let Some(handler) = registry.get(&name) else {
                bail!("worker '{name}' is not registered in this binary");
            };

            let job = Job::with_metadata(queue, body, metadata);
            if let Err(message) = handler(&job) {
                error!(worker = %name, error = %message, "worker failed");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn connect(url: &str) -> anyhow::Result<Arc<dyn Broker>> {
    let broker = DisqueBroker::connect(url)
        .await
        .with_context(|| format!("failed to connect to broker at {url}"))?;
    Ok(Arc::new(broker))
}
