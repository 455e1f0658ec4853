//! Out-of-band completion of queued bulk elements
//!
//! Elements answered with 202 continue as sub-jobs whose `parent-job` is the
//! bulk job. Reconciling reads those sub-jobs and moves each in-flight
//! resource to the bucket matching its sub-job's state.

use anyhow::Context;
use conductor_core::domain::job::{Job, JobState};
use conductor_core::domain::resource::SearchQuery;
use conductor_client::JOB_COLLECTION;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{BulkActionResult, load_result, persist};
use crate::job::JobHandle;
use crate::repository::ResourceRepository;

pub const SUB_JOB_FAILED: &str = "Sub-job failed";
pub const SUB_JOB_CANCELED: &str = "Sub-job canceled";

/// Counts of in-flight resources after a reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Resources that reached a final outcome in this pass
    pub settled: usize,
    /// Resources still queued or running
    pub in_flight: usize,
    pub progress: u8,
}

/// Promotes the in-flight resources of a bulk job from its sub-jobs' states
pub async fn reconcile(
    repository: Arc<dyn ResourceRepository>,
    bulk_job_id: &str,
) -> anyhow::Result<Reconciliation> {
    let mut bulk = JobHandle::fetch(repository.clone(), bulk_job_id)
        .await
        .with_context(|| format!("Failed to load bulk job {}", bulk_job_id))?;

    let mut result = load_result(&bulk);
    if result.in_flight_count() == 0 {
        debug!("Bulk job {} has nothing in flight", bulk_job_id);
        return Ok(Reconciliation {
            settled: 0,
            in_flight: 0,
            progress: result.progress(),
        });
    }

    let query = SearchQuery::filter(format!("parent-job=\"{}\"", bulk_job_id));
    let children = repository
        .search(JOB_COLLECTION, &query)
        .await
        .with_context(|| format!("Failed to search sub-jobs of {}", bulk_job_id))?;

    let before = result.completed_count();

    for child in children.resources {
        let child: Job = match serde_json::from_value(child) {
            Ok(child) => child,
            Err(e) => {
                warn!("Skipping unreadable sub-job of {}: {}", bulk_job_id, e);
                continue;
            }
        };

        apply_sub_job(&mut result, &child);
    }

    let settled = result.completed_count() - before;
    persist(&mut bulk, &result).await?;

    info!(
        "Bulk job {}: {} sub-job(s) settled, {} still in flight, progress {}",
        bulk_job_id,
        settled,
        result.in_flight_count(),
        result.progress()
    );

    Ok(Reconciliation {
        settled,
        in_flight: result.in_flight_count(),
        progress: result.progress(),
    })
}

/// Moves the sub-job's resource according to the sub-job's state
fn apply_sub_job(result: &mut BulkActionResult, child: &Job) {
    let Some(resource) = child.target_resource.as_ref() else {
        return;
    };

    let id = resource.href.as_str();
    if !result.is_in_flight(id) {
        return;
    }

    let message = child
        .status_message
        .clone()
        .unwrap_or_else(|| format!("{} ended {}", child.id, child.state));

    match child.state {
        JobState::Queued => {
            if !result.queued().contains(id) {
                result.add_queued(id);
            }
        }
        JobState::Running => result.set_running(id),
        JobState::Success => result.add_success(id),
        JobState::Failed => result.add_failed(SUB_JOB_FAILED, id, None, &message),
        JobState::Canceled => result.add_failed(SUB_JOB_CANCELED, id, None, &message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::ReasonKind;

    fn child(resource: &str, state: JobState, message: Option<&str>) -> Job {
        let mut job: Job = serde_json::from_value(serde_json::json!({
            "id": format!("job/{}", resource),
            "action": "delete_edge",
            "state": state,
            "target-resource": {"href": resource},
            "parent-job": "job/bulk"
        }))
        .unwrap();
        job.status_message = message.map(str::to_string);
        job
    }

    #[test]
    fn test_sub_job_states_promote_resources() {
        let mut result = BulkActionResult::new(5);
        for id in ["a", "b", "c", "d"] {
            result.add_queued(id);
        }
        result.add_success("e");

        apply_sub_job(&mut result, &child("a", JobState::Running, None));
        apply_sub_job(&mut result, &child("b", JobState::Success, None));
        apply_sub_job(&mut result, &child("c", JobState::Failed, Some("disk full")));
        apply_sub_job(&mut result, &child("d", JobState::Canceled, None));
        // not in flight: ignored
        apply_sub_job(&mut result, &child("e", JobState::Failed, None));

        assert!(result.running().contains("a"));
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failed_count(), 2);

        let failed = result.reason(ReasonKind::Failed, SUB_JOB_FAILED).unwrap();
        assert_eq!(failed.data[0].message.as_deref(), Some("disk full"));
        assert!(result.reason(ReasonKind::Failed, SUB_JOB_CANCELED).is_some());
        assert_eq!(result.progress(), 80);
    }
}
