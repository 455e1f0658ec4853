//! Engine error types

use conductor_client::ClientError;
use conductor_core::domain::job::JobState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The orchestration or coordination service call failed
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    #[error("Action {0} not implemented")]
    ActionNotImplemented(String),

    #[error("Invalid payload for job {job_id}: {reason}")]
    Payload { job_id: String, reason: String },

    /// A job edit was not stored; the job keeps its last stored state
    #[error("Failed to update job {job_id}: {source}")]
    JobUpdate {
        job_id: String,
        #[source]
        source: ClientError,
    },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Client(e) if e.is_not_found())
    }

    pub fn is_job_update(&self) -> bool {
        matches!(self, EngineError::JobUpdate { .. })
    }
}
