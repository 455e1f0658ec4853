//! In-memory collaborators for engine tests
//!
//! Stand-ins for the coordination service (queue and election) and the
//! orchestration service, recording every call so tests can assert on the
//! protocol the engine followed.

mod election;
mod queue;
mod repository;

pub use election::MemoryElection;
pub use queue::MemoryQueue;
pub use repository::MemoryRepository;

use conductor_core::domain::job::{ExecutionMode, Job, JobState};

/// A queued job record with no declared version
pub fn job(id: &str, action: &str) -> Job {
    Job {
        id: id.to_string(),
        action: action.to_string(),
        state: JobState::Queued,
        progress: 0,
        status_message: None,
        return_code: None,
        version: None,
        target_resource: None,
        execution_mode: ExecutionMode::Push,
        affected_resources: Vec::new(),
        nested_jobs: Vec::new(),
        payload: None,
        parent_job: None,
        priority: None,
        created: None,
        updated: None,
    }
}
