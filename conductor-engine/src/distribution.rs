//! Periodic job producers
//!
//! A distribution generates jobs on a fixed interval. Only the elected
//! leader of a distribution's topic runs its generator, so each distribution
//! produces from exactly one process of the fleet at a time.

use anyhow::Context;
use async_trait::async_trait;
use conductor_core::dto::job::CreateJob;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::repository::ResourceRepository;
use crate::version::ENGINE_VERSION;

/// Named periodic job producer
#[async_trait]
pub trait Distribution: Send + Sync {
    /// Name of the distribution, also used as its election topic
    fn name(&self) -> &'static str;

    /// Interval between generation cycles unless overridden in configuration
    fn default_interval(&self) -> Duration;

    /// Jobs to create for this cycle
    async fn job_generator(&self) -> anyhow::Result<Vec<CreateJob>>;
}

/// Election topic of a distribution
pub fn topic(distribution: &dyn Distribution) -> String {
    format!("distribution.{}", distribution.name())
}

/// Runs generation cycles until `stop` is cancelled
///
/// Each cycle creates the generated jobs, stamped with this engine's version
/// when the generator left it unset. A failed creation is logged and skipped;
/// a generator error ends the loop. `on_cycle` is called after every
/// completed cycle.
pub async fn generate_jobs(
    distribution: &dyn Distribution,
    repository: &dyn ResourceRepository,
    interval: Duration,
    stop: CancellationToken,
    mut on_cycle: impl FnMut() + Send,
) -> anyhow::Result<()> {
    let name = distribution.name();
    info!("Distribution {} generating every {:?}", name, interval);

    while !stop.is_cancelled() {
        let jobs = distribution
            .job_generator()
            .await
            .with_context(|| format!("Distribution {} failed to generate jobs", name))?;

        let generated = jobs.len();
        let mut created = 0;

        for mut job in jobs {
            if job.version.is_none() {
                job.version = Some(ENGINE_VERSION.to_string());
            }

            match repository.create_job(&job).await {
                Ok(response) => {
                    created += 1;
                    debug!(
                        "Distribution {} created {} job {:?}",
                        name, job.action, response.resource_id
                    );
                }
                Err(e) => warn!("Distribution {} failed to create {} job: {}", name, job.action, e),
            }
        }

        if generated > 0 {
            info!("Distribution {} created {}/{} job(s)", name, created, generated);
        }

        on_cycle();

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Distribution {} stopped generating", name);
    Ok(())
}
