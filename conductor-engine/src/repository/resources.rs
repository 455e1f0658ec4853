//! Resources repository
//!
//! Handles communication with the orchestration service:
//! - Reading and editing job records
//! - Creating jobs
//! - Searching collections and calling resource operations

use async_trait::async_trait;
use conductor_client::{OrchestratorClient, Result};
use conductor_core::domain::job::Job;
use conductor_core::domain::resource::{OperationResponse, SearchQuery, SearchResults};
use conductor_core::dto::job::{CreateJob, JobEdit};
use serde_json::Value as JsonValue;

/// Repository trait for the orchestration resource protocol
///
/// Every method reports failures as a `ClientError`, so callers can tell a
/// vanished resource (`is_not_found`) from a transient outage
/// (`is_transient`).
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Fetches a job record
    async fn get_job(&self, job_id: &str) -> Result<Job>;

    /// Applies a partial update to a job and returns the stored record
    async fn edit_job(&self, job_id: &str, edit: &JobEdit) -> Result<Job>;

    /// Creates a job; the service assigns its id and enqueues it
    async fn create_job(&self, job: &CreateJob) -> Result<OperationResponse>;

    /// Fetches the execution context the service resolved for a job
    async fn job_context(&self, job_id: &str) -> Result<JsonValue>;

    /// Fetches any resource as raw JSON
    async fn get_resource(&self, id: &str) -> Result<JsonValue>;

    /// Searches a collection
    async fn search(&self, collection: &str, query: &SearchQuery)
    -> Result<SearchResults<JsonValue>>;

    /// Calls a named operation on a resource or collection
    async fn operation(
        &self,
        id: &str,
        operation: &str,
        data: Option<JsonValue>,
    ) -> Result<OperationResponse>;

    /// Deletes a resource
    async fn delete(&self, id: &str) -> Result<OperationResponse>;
}

/// HTTP implementation of ResourceRepository
#[derive(Debug, Clone)]
pub struct HttpResourceRepository {
    client: OrchestratorClient,
}

impl HttpResourceRepository {
    /// Creates a new HTTP resource repository
    ///
    /// # Arguments
    /// * `client` - Configured orchestration service client
    pub fn new(client: OrchestratorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceRepository for HttpResourceRepository {
    async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.client.get_job(job_id).await
    }

    async fn edit_job(&self, job_id: &str, edit: &JobEdit) -> Result<Job> {
        self.client.edit_job(job_id, edit).await
    }

    async fn create_job(&self, job: &CreateJob) -> Result<OperationResponse> {
        self.client.create_job(job).await
    }

    async fn job_context(&self, job_id: &str) -> Result<JsonValue> {
        self.client.job_context(job_id).await
    }

    async fn get_resource(&self, id: &str) -> Result<JsonValue> {
        self.client.get_resource(id).await
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<SearchResults<JsonValue>> {
        self.client.search(collection, query).await
    }

    async fn operation(
        &self,
        id: &str,
        operation: &str,
        data: Option<JsonValue>,
    ) -> Result<OperationResponse> {
        let response = self.client.operation(id, operation, data.as_ref()).await?;
        Ok(operation_response(response))
    }

    async fn delete(&self, id: &str) -> Result<OperationResponse> {
        self.client.delete_resource(id).await
    }
}

/// Reads an operation's body as an `OperationResponse`
///
/// Operations that return another document (e.g. a context) are treated as
/// completed, with the document's own id if it has one.
fn operation_response(body: JsonValue) -> OperationResponse {
    match serde_json::from_value::<OperationResponse>(body.clone()) {
        Ok(response) => response,
        Err(_) => OperationResponse {
            status: 200,
            message: String::new(),
            resource_id: body.get("id").and_then(JsonValue::as_str).map(String::from),
        },
    }
}
