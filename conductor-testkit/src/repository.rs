use async_trait::async_trait;
use conductor_client::{ClientError, JOB_COLLECTION, Result};
use conductor_core::domain::job::{ExecutionMode, Job, JobState};
use conductor_core::domain::resource::{OperationResponse, SearchQuery, SearchResults};
use conductor_core::dto::job::{CreateJob, JobEdit};
use conductor_engine::repository::ResourceRepository;
use parking_lot::Mutex;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Orchestration service keeping jobs and resources in memory
///
/// Search filters understand conjunctions of `attribute="value"` terms;
/// any other term matches everything.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<RepositoryState>>,
}

#[derive(Default)]
struct RepositoryState {
    jobs: BTreeMap<String, Job>,
    /// Resources by collection, then id
    resources: BTreeMap<String, BTreeMap<String, JsonValue>>,
    edits: Vec<(String, JobEdit)>,
    created: Vec<CreateJob>,
    operations: Vec<(String, String)>,
    deleted: Vec<String>,
    next_job: u64,
    successful_edits_left: Option<usize>,
    jobs_unavailable: bool,
    delete_statuses: HashMap<String, u16>,
    delete_errors: HashMap<String, u16>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_job(&self, job: Job) {
        self.inner.lock().jobs.insert(job.id.clone(), job);
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().jobs.get(job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.inner.lock().jobs.values().cloned().collect()
    }

    /// Edits applied to a job, in order
    pub fn edits_of(&self, job_id: &str) -> Vec<JobEdit> {
        self.inner
            .lock()
            .edits
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, edit)| edit.clone())
            .collect()
    }

    pub fn created(&self) -> Vec<CreateJob> {
        self.inner.lock().created.clone()
    }

    /// Operations called, as `(resource id, operation)`
    pub fn operations(&self) -> Vec<(String, String)> {
        self.inner.lock().operations.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().deleted.clone()
    }

    pub fn insert_resource(&self, collection: &str, id: &str, mut resource: JsonValue) {
        resource["id"] = json!(id);
        self.inner
            .lock()
            .resources
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), resource);
    }

    pub fn resource_ids(&self, collection: &str) -> Vec<String> {
        self.inner
            .lock()
            .resources
            .get(collection)
            .map(|resources| resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Lets `count` more job edits succeed, then fails every edit with a 503
    pub fn fail_edits_after(&self, count: usize) {
        self.inner.lock().successful_edits_left = Some(count);
    }

    pub fn restore_edits(&self) {
        self.inner.lock().successful_edits_left = None;
    }

    /// Makes job reads fail with a 503
    pub fn set_jobs_unavailable(&self, unavailable: bool) {
        self.inner.lock().jobs_unavailable = unavailable;
    }

    /// Status answered when deleting `id`, 200 by default
    pub fn set_delete_status(&self, id: &str, status: u16) {
        self.inner
            .lock()
            .delete_statuses
            .insert(id.to_string(), status);
    }

    /// Makes deleting `id` fail with an API error
    pub fn fail_delete(&self, id: &str, status: u16) {
        self.inner.lock().delete_errors.insert(id.to_string(), status);
    }
}

fn unavailable() -> ClientError {
    ClientError::api_error(503, "orchestration service unavailable")
}

fn apply(job: &mut Job, edit: &JobEdit) {
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
    if let Some(resources) = &edit.affected_resources {
        job.affected_resources = resources.clone();
    }
    if let Some(nested) = &edit.nested_jobs {
        job.nested_jobs = nested.clone();
    }
}

/// Evaluates the `attribute="value"` terms of a filter against a resource
fn matches(filter: Option<&str>, resource: &JsonValue) -> bool {
    let Some(filter) = filter else {
        return true;
    };

    filter.split(" and ").all(|term| {
        let Some((path, value)) = term.trim().split_once('=') else {
            return true;
        };

        let path = path.trim();
        let value = value.trim();
        if path.contains(['<', '>', '(', ' ']) || !value.starts_with('"') || !value.ends_with('"') {
            return true;
        }

        let expected = value.trim_matches('"');
        let actual = path
            .split('/')
            .try_fold(resource, |current, key| current.get(key));

        match actual {
            Some(JsonValue::String(actual)) => actual == expected,
            Some(other) => other.to_string() == expected,
            None => false,
        }
    })
}

#[async_trait]
impl ResourceRepository for MemoryRepository {
    async fn get_job(&self, job_id: &str) -> Result<Job> {
        let state = self.inner.lock();
        if state.jobs_unavailable {
            return Err(unavailable());
        }

        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(job_id.to_string()))
    }

    async fn edit_job(&self, job_id: &str, edit: &JobEdit) -> Result<Job> {
        let mut state = self.inner.lock();

        match state.successful_edits_left {
            Some(0) => return Err(unavailable()),
            Some(left) => state.successful_edits_left = Some(left - 1),
            None => {}
        }

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ClientError::NotFound(job_id.to_string()))?;
        apply(job, edit);
        let job = job.clone();

        state.edits.push((job_id.to_string(), edit.clone()));
        Ok(job)
    }

    async fn create_job(&self, request: &CreateJob) -> Result<OperationResponse> {
        let mut state = self.inner.lock();
        state.next_job += 1;
        let id = format!("job/{}", state.next_job);

        let job = Job {
            id: id.clone(),
            action: request.action.clone(),
            state: JobState::Queued,
            progress: 0,
            status_message: None,
            return_code: None,
            version: request.version.clone(),
            target_resource: request.target_resource.clone(),
            execution_mode: request.execution_mode.unwrap_or(ExecutionMode::Push),
            affected_resources: request.affected_resources.clone(),
            nested_jobs: Vec::new(),
            payload: request.payload.clone(),
            parent_job: request.parent_job.clone(),
            priority: request.priority,
            created: None,
            updated: None,
        };

        state.jobs.insert(id.clone(), job);
        state.created.push(request.clone());

        Ok(OperationResponse {
            status: 201,
            message: format!("{} created", id),
            resource_id: Some(id),
        })
    }

    async fn job_context(&self, job_id: &str) -> Result<JsonValue> {
        let job = self.get_job(job_id).await?;
        Ok(json!({ "job": job.id, "action": job.action }))
    }

    async fn get_resource(&self, id: &str) -> Result<JsonValue> {
        let state = self.inner.lock();

        if let Some(job) = state.jobs.get(id) {
            return serde_json::to_value(job).map_err(|e| ClientError::ParseError(e.to_string()));
        }

        state
            .resources
            .values()
            .find_map(|resources| resources.get(id))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(id.to_string()))
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<SearchResults<JsonValue>> {
        let state = self.inner.lock();

        let candidates: Vec<JsonValue> = if collection == JOB_COLLECTION {
            state
                .jobs
                .values()
                .filter_map(|job| serde_json::to_value(job).ok())
                .collect()
        } else {
            state
                .resources
                .get(collection)
                .map(|resources| resources.values().cloned().collect())
                .unwrap_or_default()
        };

        let mut resources: Vec<JsonValue> = candidates
            .into_iter()
            .filter(|resource| matches(query.filter.as_deref(), resource))
            .collect();

        let count = resources.len() as u64;
        if let Some(last) = query.last {
            resources.truncate(last as usize);
        }

        Ok(SearchResults { count, resources })
    }

    async fn operation(
        &self,
        id: &str,
        operation: &str,
        _data: Option<JsonValue>,
    ) -> Result<OperationResponse> {
        self.inner
            .lock()
            .operations
            .push((id.to_string(), operation.to_string()));

        Ok(OperationResponse {
            status: 200,
            message: format!("{} on {} done", operation, id),
            resource_id: None,
        })
    }

    async fn delete(&self, id: &str) -> Result<OperationResponse> {
        let mut state = self.inner.lock();

        if let Some(status) = state.delete_errors.get(id).copied() {
            return Err(ClientError::api_error(status, format!("cannot delete {}", id)));
        }

        let removed = state
            .resources
            .values_mut()
            .find_map(|resources| resources.remove(id))
            .is_some();
        if !removed {
            return Err(ClientError::NotFound(id.to_string()));
        }

        state.deleted.push(id.to_string());
        let status = state.delete_statuses.get(id).copied().unwrap_or(200);

        Ok(OperationResponse {
            status,
            message: format!("{} deleted", id),
            resource_id: Some(id.to_string()),
        })
    }
}
