use async_trait::async_trait;
use conductor_core::dto::job::CreateJob;
use std::time::Duration;

use crate::actions::CLEANUP_JOBS;
use crate::distribution::Distribution;

pub const JOBS_CLEANUP: &str = "jobs_cleanup";

/// Creates one job cleanup job a day
pub struct JobsCleanup;

#[async_trait]
impl Distribution for JobsCleanup {
    fn name(&self) -> &'static str {
        JOBS_CLEANUP
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    async fn job_generator(&self) -> anyhow::Result<Vec<CreateJob>> {
        Ok(vec![CreateJob::new(CLEANUP_JOBS).priority(50)])
    }
}
