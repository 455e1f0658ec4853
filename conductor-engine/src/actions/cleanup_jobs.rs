use anyhow::Context;
use async_trait::async_trait;
use conductor_client::JOB_COLLECTION;
use tracing::info;

use crate::job::JobHandle;
use crate::registry::Action;

pub const CLEANUP_JOBS: &str = "cleanup_jobs";

/// Asks the orchestration service to purge old finished jobs
pub struct CleanupJobs;

impl CleanupJobs {
    pub fn build(_job: &JobHandle) -> anyhow::Result<Box<dyn Action>> {
        Ok(Box::new(CleanupJobs))
    }
}

#[async_trait]
impl Action for CleanupJobs {
    async fn do_work(&mut self, job: &mut JobHandle) -> anyhow::Result<i32> {
        let response = job
            .repository()
            .operation(JOB_COLLECTION, "cleanup", None)
            .await
            .context("Job cleanup operation failed")?;

        info!("Job cleanup answered {}: {}", response.status, response.message);
        job.set_status_message(response.message.clone()).await?;

        if response.is_completed() || response.is_accepted() {
            Ok(0)
        } else {
            Ok(1)
        }
    }
}
