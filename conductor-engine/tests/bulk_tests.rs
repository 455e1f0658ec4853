use async_trait::async_trait;
use conductor_core::domain::job::{Job, JobState};
use conductor_core::domain::resource::ResourceRef;
use conductor_engine::actions::{BULK_DELETE, BulkDeletePayload, MONITOR_BULK_ACTION};
use conductor_engine::bulk::{
    BulkAction, BulkActionResult, BulkRunner, ItemOutcome, ReasonKind, UNEXPECTED_ERROR, monitor,
};
use conductor_engine::repository::ResourceRepository;
use conductor_engine::version::VersionGate;
use conductor_engine::{Config, Executor, JobHandle, Outcome, default_registry};
use conductor_testkit::{MemoryQueue, MemoryRepository, job};
use parking_lot::Mutex;
use semver::Version;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bulk action answering from a fixed table, recording every call
struct Table {
    todo: Vec<String>,
    outcomes: HashMap<String, ItemOutcome>,
    calls: Mutex<Vec<String>>,
}

impl Table {
    fn new(todo: &[&str]) -> Self {
        Self {
            todo: todo.iter().map(|id| id.to_string()).collect(),
            outcomes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn answer(mut self, id: &str, outcome: ItemOutcome) -> Self {
        self.outcomes.insert(id.to_string(), outcome);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BulkAction for Table {
    async fn get_todo(&self, _job: &JobHandle) -> anyhow::Result<Vec<String>> {
        Ok(self.todo.clone())
    }

    async fn action(&self, _job: &JobHandle, id: &str) -> anyhow::Result<ItemOutcome> {
        self.calls.lock().push(id.to_string());
        if id == "broken" {
            anyhow::bail!("connection reset");
        }
        Ok(self.outcomes.get(id).cloned().unwrap_or(ItemOutcome::Success))
    }
}

async fn bulk_job(repository: &MemoryRepository) -> JobHandle {
    repository.insert_job(Job {
        state: JobState::Running,
        ..job("job/bulk", "bulk_test")
    });
    JobHandle::fetch(Arc::new(repository.clone()), "job/bulk")
        .await
        .unwrap()
}

fn stored_result(repository: &MemoryRepository) -> BulkActionResult {
    let stored = repository.job("job/bulk").unwrap();
    BulkActionResult::from_json(stored.status_message.as_deref().unwrap()).unwrap()
}

#[tokio::test]
async fn test_two_successes_and_one_skip() {
    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;
    let action = Table::new(&["a", "b", "c"]).answer("c", ItemOutcome::skipped("Offline Edge"));

    assert_eq!(BulkRunner::run(&mut handle, &action).await.unwrap(), 0);

    let result = stored_result(&repository);
    assert_eq!(
        result.success().iter().cloned().collect::<Vec<_>>(),
        vec!["a".to_string(), "b".to_string()]
    );
    assert_eq!(result.skipped_count(), 1);
    assert_eq!(result.error_reasons().len(), 1);

    let reason = result.reason(ReasonKind::Skipped, "Offline Edge").unwrap();
    assert_eq!(reason.count, 1);
    assert_eq!(reason.data[0].id, "c");

    assert_eq!(repository.job("job/bulk").unwrap().progress, 100);
    // persisted after every element
    assert_eq!(repository.edits_of("job/bulk").len(), 3);
}

#[tokio::test]
async fn test_partial_failures_account_for_every_element() {
    let ids: Vec<String> = (0..20).map(|n| format!("edge/{}", n)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let mut action = Table::new(&refs);
    for (n, category) in ["Timeout", "Denied", "Unsupported", "Offline"].iter().enumerate() {
        action = action.answer(&ids[n * 5], ItemOutcome::failed(*category, "nope"));
    }

    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;
    BulkRunner::run(&mut handle, &action).await.unwrap();

    let result = stored_result(&repository);
    assert_eq!(result.failed_count(), 4);
    assert_eq!(result.error_reasons().len(), 4);
    assert_eq!(
        result.success_count() + result.failed_count() + result.skipped_count(),
        20
    );
    assert_eq!(result.progress(), 100);
    assert_eq!(handle.progress(), 100);
}

#[tokio::test]
async fn test_element_error_is_recorded_not_fatal() {
    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;
    let action = Table::new(&["a", "broken", "c"]);

    assert_eq!(BulkRunner::run(&mut handle, &action).await.unwrap(), 0);

    let result = stored_result(&repository);
    let reason = result.reason(ReasonKind::Failed, UNEXPECTED_ERROR).unwrap();
    assert_eq!(reason.data[0].id, "broken");
    assert_eq!(reason.data[0].message.as_deref(), Some("connection reset"));
    assert_eq!(result.success_count(), 2);
}

#[tokio::test]
async fn test_empty_todo_completes_immediately() {
    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;

    assert_eq!(BulkRunner::run(&mut handle, &Table::new(&[])).await.unwrap(), 0);
    assert_eq!(handle.progress(), 100);
    assert_eq!(stored_result(&repository).total_actions(), 0);
}

#[tokio::test]
async fn test_queued_elements_hold_back_progress() {
    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;
    let action = Table::new(&["a", "b"]).answer("b", ItemOutcome::Queued);

    BulkRunner::run(&mut handle, &action).await.unwrap();

    let result = stored_result(&repository);
    assert!(result.queued().contains("b"));
    assert_eq!(result.progress(), 50);
    assert_eq!(handle.progress(), 50);
}

#[tokio::test]
async fn test_resume_after_crash_converges() {
    let ids: Vec<String> = (0..10).map(|n| format!("edge/{}", n)).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let table = || {
        Table::new(&refs)
            .answer("edge/2", ItemOutcome::skipped("Offline Edge"))
            .answer("edge/7", ItemOutcome::failed("Timeout", "no answer"))
    };

    let uninterrupted = MemoryRepository::new();
    let mut handle = bulk_job(&uninterrupted).await;
    BulkRunner::run(&mut handle, &table()).await.unwrap();

    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;
    let first = table();
    repository.fail_edits_after(4);
    assert!(BulkRunner::run(&mut handle, &first).await.is_err());
    assert_eq!(first.calls().len(), 5);

    repository.restore_edits();
    let mut handle = JobHandle::fetch(Arc::new(repository.clone()), "job/bulk")
        .await
        .unwrap();
    let second = table();
    BulkRunner::run(&mut handle, &second).await.unwrap();

    // persisted elements are not attempted again
    for id in &ids[..4] {
        assert!(!second.calls().contains(id), "{} processed twice", id);
    }
    assert_eq!(second.calls().len(), 6);

    let resumed = stored_result(&repository);
    let expected = stored_result(&uninterrupted);
    assert_eq!(resumed, expected);
    assert_eq!(resumed.total_actions(), 10);
    assert_eq!(repository.job("job/bulk").unwrap().progress, 100);
}

#[tokio::test]
async fn test_persisted_result_round_trips() {
    let repository = MemoryRepository::new();
    let mut handle = bulk_job(&repository).await;
    let action = Table::new(&["a", "b", "c", "d"])
        .answer("b", ItemOutcome::Queued)
        .answer("c", ItemOutcome::failed("Timeout", "late").with_name("edge c"))
        .answer("d", ItemOutcome::skipped("Offline Edge"));

    BulkRunner::run(&mut handle, &action).await.unwrap();

    let result = stored_result(&repository);
    let json = result.to_json().unwrap();
    assert_eq!(BulkActionResult::from_json(&json).unwrap(), result);
    assert_eq!(
        result.reason(ReasonKind::Failed, "Timeout").unwrap().data[0]
            .name
            .as_deref(),
        Some("edge c")
    );
}

fn bulk_delete_executor(queue: &MemoryQueue, repository: &MemoryRepository) -> Executor {
    let mut config = Config::default();
    config.poll_timeout = Duration::from_millis(10);
    Executor::new(
        config,
        Arc::new(queue.clone()),
        Arc::new(repository.clone()),
        Arc::new(default_registry()),
        CancellationToken::new(),
    )
    .with_gate(VersionGate::new(Version::new(4, 2, 0), &[]))
}

fn bulk_delete_job(filter: &str) -> Job {
    let payload = BulkDeletePayload {
        collection: "edge".to_string(),
        filter: filter.to_string(),
    };
    Job {
        version: Some("4.2.0".to_string()),
        payload: Some(serde_json::to_string(&payload).unwrap()),
        ..job("job/bulk", BULK_DELETE)
    }
}

#[tokio::test]
async fn test_lost_bulk_update_releases_job_for_resume() {
    let repository = MemoryRepository::new();
    for n in 1..=3 {
        repository.insert_resource("edge", &format!("edge/{}", n), json!({ "state": "OFFLINE" }));
    }
    repository.insert_job(bulk_delete_job("state=\"OFFLINE\""));

    let queue = MemoryQueue::new();
    queue.push("job/bulk");
    let executor = bulk_delete_executor(&queue, &repository);

    // RUNNING and the result after edge/1 are stored, the one after edge/2 is not
    repository.fail_edits_after(2);
    assert_eq!(executor.process_next().await.unwrap(), Some(Outcome::UpdateFailed));
    repository.restore_edits();

    let bulk = repository.job("job/bulk").unwrap();
    assert_eq!(bulk.state, JobState::Running);
    assert_eq!(queue.released(), vec!["job/bulk".to_string()]);
    assert!(queue.consumed().is_empty());

    // the last stored snapshot is intact
    let snapshot = stored_result(&repository);
    assert!(snapshot.success().contains("edge/1"));
    assert_eq!(snapshot.total_actions(), 3);
    assert_eq!(repository.resource_ids("edge"), vec!["edge/3".to_string()]);

    assert_eq!(
        executor.process_next().await.unwrap(),
        Some(Outcome::Completed {
            state: JobState::Success,
            return_code: 0
        })
    );

    let resumed = stored_result(&repository);
    assert!(resumed.success().contains("edge/1"));
    assert!(resumed.success().contains("edge/3"));
    assert_eq!(resumed.total_actions(), 3);
    assert!(repository.resource_ids("edge").is_empty());
    assert_eq!(queue.consumed(), vec!["job/bulk".to_string()]);
}

#[tokio::test]
async fn test_bulk_delete_through_executor_and_monitor() {
    let repository = MemoryRepository::new();
    for n in 1..=4 {
        let state = if n == 4 { "ONLINE" } else { "OFFLINE" };
        repository.insert_resource("edge", &format!("edge/{}", n), json!({ "state": state }));
    }
    repository.fail_delete("edge/2", 403);
    repository.set_delete_status("edge/3", 202);

    repository.insert_job(bulk_delete_job("state=\"OFFLINE\""));

    let queue = MemoryQueue::new();
    queue.push("job/bulk");
    let executor = bulk_delete_executor(&queue, &repository);

    assert_eq!(
        executor.process_next().await.unwrap(),
        Some(Outcome::Completed {
            state: JobState::Success,
            return_code: 0
        })
    );

    let bulk = repository.job("job/bulk").unwrap();
    assert_eq!(bulk.progress, 66);
    assert_eq!(repository.resource_ids("edge"), vec!["edge/2".to_string(), "edge/4".to_string()]);

    let result = stored_result(&repository);
    assert!(result.success().contains("edge/1"));
    assert!(result.queued().contains("edge/3"));
    assert_eq!(result.failed_count(), 1);

    // the sub-job deleting edge/3 finishes later
    let mut sub_job = job("job/sub", "delete_edge");
    sub_job.state = JobState::Success;
    sub_job.parent_job = Some("job/bulk".to_string());
    sub_job.target_resource = Some(ResourceRef::new("edge/3"));
    repository.insert_job(sub_job);

    let repo: Arc<dyn ResourceRepository> = Arc::new(repository.clone());
    let reconciliation = monitor::reconcile(repo, "job/bulk").await.unwrap();
    assert_eq!(reconciliation.settled, 1);
    assert_eq!(reconciliation.in_flight, 0);
    assert_eq!(reconciliation.progress, 100);

    let result = stored_result(&repository);
    assert_eq!(result.success_count(), 2);
    assert_eq!(repository.job("job/bulk").unwrap().progress, 100);

    // the monitor is also reachable as an action
    let mut monitor_job = job("job/monitor", MONITOR_BULK_ACTION);
    monitor_job.version = Some("4.2.0".to_string());
    monitor_job.target_resource = Some(ResourceRef::new("job/bulk"));
    repository.insert_job(monitor_job);

    assert_eq!(
        executor.run_single("job/monitor").await,
        Outcome::Completed {
            state: JobState::Success,
            return_code: 0
        }
    );
}
