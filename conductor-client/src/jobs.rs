//! Job-related API endpoints

use conductor_core::domain::job::Job;
use conductor_core::domain::resource::OperationResponse;
use conductor_core::dto::job::{CreateJob, JobEdit};

use crate::OrchestratorClient;
use crate::error::Result;

/// Collection holding job records
pub const JOB_COLLECTION: &str = "job";

impl OrchestratorClient {
    // =============================================================================
    // Job Records
    // =============================================================================

    /// Get a job by id
    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.get_resource(job_id).await
    }

    /// Apply a partial update to a job
    ///
    /// # Returns
    /// The job record as stored after the update
    pub async fn edit_job(&self, job_id: &str, edit: &JobEdit) -> Result<Job> {
        self.edit_resource(job_id, edit).await
    }

    /// Create a new job
    ///
    /// The service assigns the id and enqueues the job for the executors.
    pub async fn create_job(&self, job: &CreateJob) -> Result<OperationResponse> {
        self.add_resource(JOB_COLLECTION, job).await
    }

    /// Fetch the execution context of a job
    ///
    /// The context bundles the resources the job's action needs (target,
    /// credentials, infrastructure) as resolved by the service.
    pub async fn job_context(&self, job_id: &str) -> Result<serde_json::Value> {
        self.operation::<()>(job_id, "get-context", None).await
    }
}
