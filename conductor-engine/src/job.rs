//! Job handle
//!
//! Wraps a job record together with the repository it came from. Every
//! mutation goes through an edit call on the orchestration service and the
//! cached record is replaced with the stored result, so the handle always
//! reflects what the service has persisted.

use conductor_core::domain::job::{ExecutionMode, Job, JobState};
use conductor_core::domain::resource::ResourceRef;
use conductor_core::dto::job::JobEdit;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::repository::ResourceRepository;

/// A job owned by the executor holding its queue lease
pub struct JobHandle {
    record: Job,
    repository: Arc<dyn ResourceRepository>,
}

impl JobHandle {
    /// Loads a job from the orchestration service
    pub async fn fetch(repository: Arc<dyn ResourceRepository>, job_id: &str) -> Result<Self> {
        let record = repository.get_job(job_id).await?;
        Ok(Self { record, repository })
    }

    pub fn from_record(record: Job, repository: Arc<dyn ResourceRepository>) -> Self {
        Self { record, repository }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn action(&self) -> &str {
        &self.record.action
    }

    pub fn state(&self) -> JobState {
        self.record.state
    }

    pub fn progress(&self) -> u8 {
        self.record.progress
    }

    pub fn status_message(&self) -> Option<&str> {
        self.record.status_message.as_deref()
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.record.execution_mode
    }

    pub fn target_resource(&self) -> Option<&ResourceRef> {
        self.record.target_resource.as_ref()
    }

    pub fn is_in_final_state(&self) -> bool {
        self.record.is_in_final_state()
    }

    pub fn record(&self) -> &Job {
        &self.record
    }

    pub fn repository(&self) -> &Arc<dyn ResourceRepository> {
        &self.repository
    }

    /// Deserializes the action-specific payload
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = self
            .record
            .payload
            .as_deref()
            .ok_or_else(|| EngineError::Payload {
                job_id: self.record.id.clone(),
                reason: "payload is missing".to_string(),
            })?;

        serde_json::from_str(raw).map_err(|e| EngineError::Payload {
            job_id: self.record.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Fetches the execution context resolved by the service
    pub async fn context(&self) -> Result<JsonValue> {
        Ok(self.repository.job_context(&self.record.id).await?)
    }

    /// Applies a partial update
    ///
    /// Progress is clamped to 100 and dropped unless it moves forward. A
    /// state change that would leave a terminal state or move backwards is
    /// rejected without calling the service.
    pub async fn update(&mut self, mut edit: JobEdit) -> Result<()> {
        if let Some(state) = edit.state {
            if !self.record.state.can_transition_to(state) {
                return Err(EngineError::InvalidTransition {
                    job_id: self.record.id.clone(),
                    from: self.record.state,
                    to: state,
                });
            }
        }

        edit.progress = edit
            .progress
            .map(|progress| progress.min(100))
            .filter(|progress| *progress > self.record.progress);

        self.apply(edit).await
    }

    async fn apply(&mut self, edit: JobEdit) -> Result<()> {
        if edit.is_empty() {
            return Ok(());
        }

        debug!("Updating job {}: {:?}", self.record.id, edit);
        self.record = self
            .repository
            .edit_job(&self.record.id, &edit)
            .await
            .map_err(|source| EngineError::JobUpdate {
                job_id: self.record.id.clone(),
                source,
            })?;
        Ok(())
    }

    pub async fn set_state(&mut self, state: JobState) -> Result<()> {
        self.update(JobEdit::state(state)).await
    }

    pub async fn set_progress(&mut self, progress: u8) -> Result<()> {
        self.update(JobEdit::default().with_progress(progress)).await
    }

    pub async fn set_status_message(&mut self, message: impl Into<String>) -> Result<()> {
        self.update(JobEdit::default().with_status_message(message))
            .await
    }

    /// Records the handler's return code as the terminal state
    ///
    /// 0 is SUCCESS, anything else is FAILED. Progress is left as the
    /// handler set it: a bulk job finishes with its in-flight share pending.
    pub async fn complete(&mut self, return_code: i32) -> Result<()> {
        let state = if return_code == 0 {
            JobState::Success
        } else {
            JobState::Failed
        };

        self.update(JobEdit::state(state).with_return_code(return_code))
            .await
    }

    pub async fn fail(&mut self, message: impl Into<String>, return_code: i32) -> Result<()> {
        self.update(
            JobEdit::state(JobState::Failed)
                .with_return_code(return_code)
                .with_status_message(message),
        )
        .await
    }

    /// Puts a running job back in the queue to be retried in pull mode
    ///
    /// The only sanctioned backwards transition. Switching the execution mode
    /// in the same edit makes it happen at most once per job.
    pub async fn requeue_in_pull_mode(&mut self, message: impl Into<String>) -> Result<()> {
        if self.record.is_in_final_state() || self.record.execution_mode != ExecutionMode::Mixed {
            return Err(EngineError::InvalidTransition {
                job_id: self.record.id.clone(),
                from: self.record.state,
                to: JobState::Queued,
            });
        }

        self.apply(
            JobEdit::state(JobState::Queued)
                .with_execution_mode(ExecutionMode::Pull)
                .with_status_message(message),
        )
        .await
    }

    pub async fn add_affected_resources(&mut self, resources: &[ResourceRef]) -> Result<()> {
        let mut affected = self.record.affected_resources.clone();
        for resource in resources {
            if !affected.contains(resource) {
                affected.push(resource.clone());
            }
        }

        if affected.len() == self.record.affected_resources.len() {
            return Ok(());
        }

        self.apply(JobEdit {
            affected_resources: Some(affected),
            ..JobEdit::default()
        })
        .await
    }

    pub async fn add_nested_job(&mut self, job_id: &str) -> Result<()> {
        if self.record.nested_jobs.iter().any(|id| id == job_id) {
            return Ok(());
        }

        let mut nested = self.record.nested_jobs.clone();
        nested.push(job_id.to_string());

        self.apply(JobEdit {
            nested_jobs: Some(nested),
            ..JobEdit::default()
        })
        .await
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.record.id)
            .field("action", &self.record.action)
            .field("state", &self.record.state)
            .field("progress", &self.record.progress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_client::ClientError;
    use conductor_core::domain::resource::{OperationResponse, SearchQuery, SearchResults};
    use conductor_core::dto::job::CreateJob;
    use std::sync::Mutex;

    /// Applies edits to a single in-memory record
    struct SingleJobRepository {
        job: Mutex<Job>,
        edits: Mutex<Vec<JobEdit>>,
    }

    impl SingleJobRepository {
        fn new(job: Job) -> Arc<Self> {
            Arc::new(Self {
                job: Mutex::new(job),
                edits: Mutex::new(Vec::new()),
            })
        }

        fn edits(&self) -> Vec<JobEdit> {
            self.edits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceRepository for SingleJobRepository {
        async fn get_job(&self, _job_id: &str) -> conductor_client::Result<Job> {
            Ok(self.job.lock().unwrap().clone())
        }

        async fn edit_job(&self, _job_id: &str, edit: &JobEdit) -> conductor_client::Result<Job> {
            self.edits.lock().unwrap().push(edit.clone());
            let mut job = self.job.lock().unwrap();
            if let Some(state) = edit.state {
                job.state = state;
            }
            if let Some(progress) = edit.progress {
                job.progress = progress;
            }
            if let Some(message) = &edit.status_message {
                job.status_message = Some(message.clone());
            }
            if let Some(code) = edit.return_code {
                job.return_code = Some(code);
            }
            if let Some(mode) = edit.execution_mode {
                job.execution_mode = mode;
            }
            if let Some(nested) = &edit.nested_jobs {
                job.nested_jobs = nested.clone();
            }
            Ok(job.clone())
        }

        async fn create_job(&self, _job: &CreateJob) -> conductor_client::Result<OperationResponse> {
            Err(ClientError::InvalidRequest("unsupported".to_string()))
        }

        async fn job_context(&self, _job_id: &str) -> conductor_client::Result<JsonValue> {
            Ok(serde_json::json!({"edge": "edge/1"}))
        }

        async fn get_resource(&self, id: &str) -> conductor_client::Result<JsonValue> {
            Err(ClientError::NotFound(id.to_string()))
        }

        async fn search(
            &self,
            _collection: &str,
            _query: &SearchQuery,
        ) -> conductor_client::Result<SearchResults<JsonValue>> {
            Ok(SearchResults::default())
        }

        async fn operation(
            &self,
            _id: &str,
            _operation: &str,
            _data: Option<JsonValue>,
        ) -> conductor_client::Result<OperationResponse> {
            Err(ClientError::InvalidRequest("unsupported".to_string()))
        }

        async fn delete(&self, id: &str) -> conductor_client::Result<OperationResponse> {
            Err(ClientError::NotFound(id.to_string()))
        }
    }

    fn job(state: JobState) -> Job {
        serde_json::from_value(serde_json::json!({
            "id": "job/1",
            "action": "reboot_edge",
            "state": state,
            "payload": "{\"force\": true}"
        }))
        .unwrap()
    }

    async fn handle(state: JobState) -> (JobHandle, Arc<SingleJobRepository>) {
        let repository = SingleJobRepository::new(job(state));
        let handle = JobHandle::fetch(repository.clone(), "job/1").await.unwrap();
        (handle, repository)
    }

    #[tokio::test]
    async fn test_update_refreshes_cached_record() {
        let (mut job, _) = handle(JobState::Queued).await;

        job.set_state(JobState::Running).await.unwrap();
        job.set_status_message("rebooting").await.unwrap();

        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.status_message(), Some("rebooting"));
    }

    #[tokio::test]
    async fn test_terminal_state_is_absorbing() {
        let (mut job, repository) = handle(JobState::Failed).await;

        let err = job.set_state(JobState::Running).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert!(repository.edits().is_empty());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let (mut job, repository) = handle(JobState::Running).await;

        job.set_progress(40).await.unwrap();
        job.set_progress(30).await.unwrap();
        job.set_progress(250).await.unwrap();

        assert_eq!(job.progress(), 100);
        assert_eq!(repository.edits().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_maps_return_code() {
        let (mut job, _) = handle(JobState::Running).await;
        job.complete(0).await.unwrap();
        assert_eq!(job.state(), JobState::Success);
        assert_eq!(job.record().return_code, Some(0));

        let (mut job, _) = handle(JobState::Running).await;
        job.complete(3).await.unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.record().return_code, Some(3));
    }

    #[tokio::test]
    async fn test_requeue_switches_to_pull_in_one_edit() {
        let repository = SingleJobRepository::new(Job {
            execution_mode: ExecutionMode::Mixed,
            ..job(JobState::Running)
        });
        let mut job = JobHandle::fetch(repository.clone(), "job/1").await.unwrap();

        job.requeue_in_pull_mode("push failed").await.unwrap();

        assert_eq!(job.state(), JobState::Queued);
        assert_eq!(job.execution_mode(), ExecutionMode::Pull);
        assert_eq!(repository.edits().len(), 1);

        // a pulled retry is no longer eligible
        job.set_state(JobState::Running).await.unwrap();
        assert!(job.requeue_in_pull_mode("again").await.is_err());
    }

    #[tokio::test]
    async fn test_payload_and_context() {
        #[derive(serde::Deserialize)]
        struct Params {
            force: bool,
        }

        let (job, _) = handle(JobState::Running).await;
        assert!(job.payload::<Params>().unwrap().force);
        assert_eq!(job.context().await.unwrap()["edge"], "edge/1");

        let bare = JobHandle::from_record(
            Job {
                payload: None,
                ..job.record().clone()
            },
            job.repository().clone(),
        );
        assert!(matches!(
            bare.payload::<Params>(),
            Err(EngineError::Payload { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_jobs_are_deduplicated() {
        let (mut job, repository) = handle(JobState::Running).await;

        job.add_nested_job("job/2").await.unwrap();
        job.add_nested_job("job/2").await.unwrap();

        assert_eq!(job.record().nested_jobs, vec!["job/2".to_string()]);
        assert_eq!(repository.edits().len(), 1);
    }
}
