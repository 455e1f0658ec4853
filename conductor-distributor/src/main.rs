//! Conductor Distributor
//!
//! Runs the periodic job producers. Every distribution campaigns for its own
//! election topic, so any number of distributors can run side by side while
//! each distribution generates jobs on one of them only.

use anyhow::{Context, Result};
use clap::Parser;
use conductor_client::{CoordinationClient, OrchestratorClient};
use conductor_engine::coordination::HttpElection;
use conductor_engine::distributions;
use conductor_engine::distributor::Distributor;
use conductor_engine::repository::{HttpResourceRepository, ResourceRepository};
use conductor_engine::retry::{Backoff, with_backoff};
use conductor_engine::shutdown::install_shutdown_handler;
use conductor_engine::version::ENGINE_VERSION;
use conductor_engine::Config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STARTUP_ATTEMPTS: u32 = 10;

#[derive(Parser)]
#[command(name = "conductor-distributor")]
#[command(about = "Generates periodic orchestration jobs", long_about = None)]
struct Cli {
    /// Run only these distributions (comma separated)
    #[arg(long, env = "DISTRIBUTIONS", value_delimiter = ',')]
    only: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor_distributor=info,conductor_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Starting Conductor Distributor {}", ENGINE_VERSION);

    let config = load_config()?;
    info!(
        "Loaded configuration: engine_id={}, orchestrator_url={}, coordination_url={}",
        config.engine_id, config.orchestrator_url, config.coordination_url
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

    let repository: Arc<dyn ResourceRepository> = Arc::new(HttpResourceRepository::new(client));
    let election = HttpElection::new(
        CoordinationClient::new(config.coordination_url.clone()),
        config.election_ttl,
    );

    let shutdown = install_shutdown_handler().context("Failed to install signal handlers")?;

    let mut distributor = Distributor::new(
        config,
        Arc::new(election),
        repository.clone(),
        distributions::all(repository),
        shutdown,
    );

    if !cli.only.is_empty() {
        distributor = distributor.only(&cli.only)?;
    }

    distributor.run().await;

    Ok(())
}

/// Loads configuration from environment variables
///
/// Unset variables take their defaults; malformed ones stop the process.
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
