//! Verity Worker - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use verity_backend::{RedisBackend, RedisBackendConfig};
use verity_broker::{RedisBroker, RedisBrokerConfig};
use verity_core::VerityConfig;
use verity_engine::{prepare_registry, run_compute, ComputeRequest};
use verity_telemetry::{init_logging, LogTarget};
use verity_worker::{
    build_engine, build_registry, shutdown_signal, PoolLauncher, PoolPlan, Worker, WorkerRole,
};

/// Verity Worker - AI model and dataset validation workers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VERITY_CONFIG")]
    config: Option<PathBuf>,

    /// Redis host
    #[arg(long, env = "VERITY_REDIS_HOST")]
    redis_host: Option<String>,

    /// Redis port
    #[arg(long, env = "VERITY_REDIS_PORT")]
    redis_port: Option<u16>,

    /// Log level
    #[arg(long, env = "VERITY_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch one worker process per available core
    Pool,

    /// Run a single worker
    Worker {
        /// Stream to consume
        #[arg(long, value_enum, env = "VERITY_WORKER_ROLE")]
        role: WorkerRole,

        /// Slot index, determines the consumer name
        #[arg(long, env = "VERITY_WORKER_INDEX")]
        index: usize,
    },

    /// Run one algorithm computation: request on stdin, events on stdout
    Compute,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = VerityConfig::load(cli.config.as_ref())?;

    // Override with CLI args
    if let Some(host) = cli.redis_host {
        config.broker.host = host;
    }
    if let Some(port) = cli.redis_port {
        config.broker.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    match cli.command {
        Commands::Pool => {
            init_logging(&config.logging, LogTarget::Stdout)?;
            run_pool(&config, cli.config).await
        }
        Commands::Worker { role, index } => {
            init_logging(&config.logging, LogTarget::Stdout)?;
            run_worker(&config, role, index).await
        }
        Commands::Compute => {
            init_logging(&config.logging, LogTarget::Stderr)?;
            // Plugins may block (api models use a blocking http client)
            tokio::task::spawn_blocking(compute)
                .await
                .context("compute thread panicked")?
        }
    }
}

async fn run_pool(config: &VerityConfig, config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting Verity pool v{}", env!("CARGO_PKG_VERSION"));
    let plan = PoolPlan::detect(config.worker.min_cores)?;
    let program = std::env::current_exe().context("unable to locate the worker executable")?;

    PoolLauncher::new(program, plan)
        .with_config(config_path)
        .with_env("VERITY_REDIS_HOST", &config.broker.host)
        .with_env("VERITY_REDIS_PORT", config.broker.port.to_string())
        .with_env("VERITY_LOG_LEVEL", &config.logging.level)
        .with_shutdown_timeout(Duration::from_secs(config.worker.shutdown_timeout))
        .run(shutdown_signal())
        .await?;
    Ok(())
}

async fn run_worker(config: &VerityConfig, role: WorkerRole, index: usize) -> Result<()> {
    info!("Starting Verity {} worker v{}", role, env!("CARGO_PKG_VERSION"));
    info!("Broker: {}", config.broker.url());

    let backend = RedisBackend::with_config(RedisBackendConfig::from(&config.broker)).await?;
    let broker = RedisBroker::with_config(RedisBrokerConfig::from(&config.broker)).await?;

    let registry = Arc::new(build_registry(config, backend.clone()));
    info!("Registered plugins: {}", registry.plugin_summary().join(", "));
    let engine = Arc::new(build_engine(config, registry)?);

    let worker = Worker::new(role, broker, backend, engine, config, index);
    info!("Verity worker {} ready", worker.consumer_name());
    worker.run(shutdown_signal()).await?;
    Ok(())
}

fn compute() -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("unable to read compute request")?;
    let request: ComputeRequest =
        serde_json::from_str(&input).context("invalid compute request")?;

    let registry = prepare_registry(&request);
    run_compute(&request, &registry, std::io::stdout())?;
    Ok(())
}
