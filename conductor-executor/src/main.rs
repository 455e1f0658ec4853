//! Conductor Executor
//!
//! Consumes job ids from the coordination queue and runs the matching action
//! handler for each of them.
//!
//! Without arguments the executor serves the queue until SIGINT/SIGTERM.
//! Given a job id it runs that single job and exits, which is how a job is
//! re-run by hand.

use anyhow::{Context, Result};
use clap::Parser;
use conductor_client::{CoordinationClient, OrchestratorClient};
use conductor_engine::coordination::HttpCoordinationQueue;
use conductor_engine::repository::HttpResourceRepository;
use conductor_engine::retry::{Backoff, with_backoff};
use conductor_engine::shutdown::install_shutdown_handler;
use conductor_engine::version::ENGINE_VERSION;
use conductor_engine::{Config, Executor, Outcome, default_registry};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STARTUP_ATTEMPTS: u32 = 10;

#[derive(Parser)]
#[command(name = "conductor-executor")]
#[command(about = "Runs queued orchestration jobs", long_about = None)]
struct Cli {
    /// Run this job once instead of serving the queue
    #[arg(env = "JOB_ID")]
    job_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor_executor=info,conductor_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting Conductor Executor {}", ENGINE_VERSION);

    let config = load_config()?;
    info!(
        "Loaded configuration: engine_id={}, orchestrator_url={}, queue={}",
        config.engine_id, config.orchestrator_url, config.queue_name
    );

    let mut client = OrchestratorClient::new(config.orchestrator_url.clone());
    if let (Some(key), Some(secret)) = (&config.api_key, &config.api_secret) {
        client = client.with_credentials(key, secret);
    }

    with_backoff(
        "Connecting to the orchestration service",
        STARTUP_ATTEMPTS,
        Backoff::reconnect(),
        || client.ping(),
    )
    .await
    .context("Orchestration service unreachable")?;
    info!("Orchestration service reachable");

    let registry = default_registry();
    info!("Registered {} action(s)", registry.len());
    for name in registry.names() {
        info!("  - {}", name);
    }

    let queue = HttpCoordinationQueue::new(
        CoordinationClient::new(config.coordination_url.clone()),
        config.queue_name.clone(),
        config.engine_id.clone(),
    );

    let shutdown = install_shutdown_handler().context("Failed to install signal handlers")?;

    let executor = Executor::new(
        config,
        Arc::new(queue),
        Arc::new(HttpResourceRepository::new(client)),
        Arc::new(registry),
        shutdown,
    );

    let Some(job_id) = cli.job_id else {
        executor.run().await;
        info!("Executor stopped");
        return Ok(());
    };

    match executor.run_single(&job_id).await {
        Outcome::NotFound => anyhow::bail!("Job {} does not exist", job_id),
        Outcome::Unavailable => anyhow::bail!("Job {} could not be read", job_id),
        outcome => {
            info!("Job {} done: {:?}", job_id, outcome);
            if matches!(outcome, Outcome::UpdateFailed) {
                error!("The final state of job {} was not recorded", job_id);
            }
            Ok(())
        }
    }
}

/// Loads configuration from environment variables
///
/// Unset variables take their defaults; malformed ones stop the process.
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
