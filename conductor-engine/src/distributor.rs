//! Distribution supervisor
//!
//! Runs one task per registered distribution. Each task campaigns for its
//! distribution's topic, generates jobs while it leads and re-enters the
//! election when the term ends. The supervisory loop respawns any task that
//! died, so one misbehaving distribution cannot stop producing for good.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::coordination::{Election, lead};
use crate::distribution::{Distribution, generate_jobs, topic};
use crate::repository::ResourceRepository;
use crate::retry::Backoff;

pub struct Distributor {
    config: Config,
    election: Arc<dyn Election>,
    repository: Arc<dyn ResourceRepository>,
    distributions: Vec<Arc<dyn Distribution>>,
    shutdown: CancellationToken,
}

impl Distributor {
    /// Creates a distributor
    ///
    /// # Arguments
    /// * `config` - Engine configuration; `engine_id` is the election participant
    /// * `election` - Leader election shared by all distributions
    /// * `repository` - Orchestration service the jobs are created in
    /// * `distributions` - Distributions to supervise
    /// * `shutdown` - Cancelled to stop every distribution
    pub fn new(
        config: Config,
        election: Arc<dyn Election>,
        repository: Arc<dyn ResourceRepository>,
        distributions: Vec<Arc<dyn Distribution>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            election,
            repository,
            distributions,
            shutdown,
        }
    }

    /// Keeps only the named distributions
    pub fn only(mut self, names: &[String]) -> anyhow::Result<Self> {
        for name in names {
            if !self.distributions.iter().any(|d| d.name() == name) {
                anyhow::bail!("Unknown distribution '{}'", name);
            }
        }

        self.distributions
            .retain(|d| names.iter().any(|name| name == d.name()));
        Ok(self)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.distributions.iter().map(|d| d.name()).collect()
    }

    fn spawn(&self, distribution: &Arc<dyn Distribution>) -> JoinHandle<()> {
        let worker = Worker {
            election: self.election.clone(),
            repository: self.repository.clone(),
            distribution: distribution.clone(),
            participant: self.config.engine_id.clone(),
            interval: self
                .config
                .interval_for(distribution.name(), distribution.default_interval()),
            shutdown: self.shutdown.clone(),
        };

        tokio::spawn(worker.run())
    }

    /// Supervises the distributions until shutdown
    pub async fn run(self) {
        info!(
            "Distributor {} starting {} distribution(s): {}",
            self.config.engine_id,
            self.distributions.len(),
            self.names().join(", ")
        );

        let mut workers: Vec<(Arc<dyn Distribution>, JoinHandle<()>)> = self
            .distributions
            .iter()
            .map(|distribution| (distribution.clone(), self.spawn(distribution)))
            .collect();

        let mut ticker = tokio::time::interval(self.config.supervise_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for (distribution, handle) in workers.iter_mut() {
                if !handle.is_finished() || self.shutdown.is_cancelled() {
                    continue;
                }

                let finished = std::mem::replace(handle, self.spawn(distribution));
                match finished.await {
                    Err(e) if e.is_panic() => {
                        error!("Distribution {} panicked, restarting it", distribution.name())
                    }
                    _ => warn!("Distribution {} exited, restarting it", distribution.name()),
                }
            }
        }

        info!("Stopping {} distribution(s)", workers.len());

        for (distribution, handle) in workers {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Distribution {} panicked while stopping", distribution.name());
                }
            }
        }

        info!("Distributor {} stopped", self.config.engine_id);
    }
}

/// Election loop of one distribution
struct Worker {
    election: Arc<dyn Election>,
    repository: Arc<dyn ResourceRepository>,
    distribution: Arc<dyn Distribution>,
    participant: String,
    interval: Duration,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let topic = topic(self.distribution.as_ref());
        let mut backoff = Backoff::reconnect();

        while !self.shutdown.is_cancelled() {
            let cycled = AtomicBool::new(false);

            let result = lead(
                self.election.as_ref(),
                &topic,
                &self.participant,
                &self.shutdown,
                |stop| {
                    generate_jobs(
                        self.distribution.as_ref(),
                        self.repository.as_ref(),
                        self.interval,
                        stop,
                        || cycled.store(true, Ordering::Relaxed),
                    )
                },
            )
            .await;

            if self.shutdown.is_cancelled() {
                break;
            }

            // a term that produced at least one cycle counts as healthy
            if cycled.load(Ordering::Relaxed) {
                backoff.reset();
            }

            let delay = backoff.next_delay();
            match result {
                Ok(()) => info!("Term on {} ended, campaigning again in {:?}", topic, delay),
                Err(e) => warn!("Term on {} ended: {:#}; campaigning again in {:?}", topic, e, delay),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
