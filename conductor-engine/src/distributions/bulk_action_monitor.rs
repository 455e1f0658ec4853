use anyhow::Context;
use async_trait::async_trait;
use conductor_client::JOB_COLLECTION;
use conductor_core::domain::resource::SearchQuery;
use conductor_core::dto::job::CreateJob;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::actions::MONITOR_BULK_ACTION;
use crate::distribution::Distribution;
use crate::repository::ResourceRepository;

pub const BULK_ACTION_MONITOR: &str = "bulk_action_monitor";

/// Schedules a monitor job for every bulk job with sub-jobs in flight
pub struct BulkActionMonitor {
    repository: Arc<dyn ResourceRepository>,
    bulk_actions: &'static [&'static str],
}

impl BulkActionMonitor {
    pub fn new(repository: Arc<dyn ResourceRepository>, bulk_actions: &'static [&'static str]) -> Self {
        Self {
            repository,
            bulk_actions,
        }
    }

    fn unfinished_bulk_jobs(&self) -> SearchQuery {
        let actions = self
            .bulk_actions
            .iter()
            .map(|action| format!("action=\"{}\"", action))
            .collect::<Vec<_>>()
            .join(" or ");

        SearchQuery::filter(format!("({}) and progress<100 and state=\"SUCCESS\"", actions))
            .select("id")
    }

    fn pending_monitors(bulk_job_id: &str) -> SearchQuery {
        SearchQuery::filter(format!(
            "action=\"{}\" and target-resource/href=\"{}\" and (state=\"QUEUED\" or state=\"RUNNING\")",
            MONITOR_BULK_ACTION, bulk_job_id
        ))
        .select("id")
        .last(1)
    }
}

#[async_trait]
impl Distribution for BulkActionMonitor {
    fn name(&self) -> &'static str {
        BULK_ACTION_MONITOR
    }

    fn default_interval(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn job_generator(&self) -> anyhow::Result<Vec<CreateJob>> {
        if self.bulk_actions.is_empty() {
            return Ok(Vec::new());
        }

        let bulk_jobs = self
            .repository
            .search(JOB_COLLECTION, &self.unfinished_bulk_jobs())
            .await
            .context("Failed to search unfinished bulk jobs")?;

        let mut jobs = Vec::new();

        for bulk_job in bulk_jobs.resources {
            let Some(id) = bulk_job.get("id").and_then(|id| id.as_str()) else {
                continue;
            };

            let pending = self
                .repository
                .search(JOB_COLLECTION, &Self::pending_monitors(id))
                .await
                .with_context(|| format!("Failed to search monitor jobs of {}", id))?;

            if pending.count > 0 {
                debug!("Bulk job {} already has a pending monitor", id);
                continue;
            }

            jobs.push(CreateJob::new(MONITOR_BULK_ACTION).target(id));
        }

        Ok(jobs)
    }
}
