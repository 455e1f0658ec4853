use anyhow::Context;
use async_trait::async_trait;

use crate::bulk::monitor;
use crate::job::JobHandle;
use crate::registry::Action;

pub const MONITOR_BULK_ACTION: &str = "monitor_bulk_action";

/// Reconciles the bulk job named as target resource with its sub-jobs
pub struct MonitorBulkAction {
    bulk_job_id: String,
}

impl MonitorBulkAction {
    pub fn build(job: &JobHandle) -> anyhow::Result<Box<dyn Action>> {
        let bulk_job_id = job
            .target_resource()
            .map(|target| target.href.clone())
            .context("Bulk action monitor job has no target resource")?;

        Ok(Box::new(Self { bulk_job_id }))
    }
}

#[async_trait]
impl Action for MonitorBulkAction {
    async fn do_work(&mut self, job: &mut JobHandle) -> anyhow::Result<i32> {
        let reconciliation = monitor::reconcile(job.repository().clone(), &self.bulk_job_id).await?;

        job.set_status_message(format!(
            "{} settled, {} in flight, bulk progress {}",
            reconciliation.settled, reconciliation.in_flight, reconciliation.progress
        ))
        .await?;

        Ok(0)
    }
}
