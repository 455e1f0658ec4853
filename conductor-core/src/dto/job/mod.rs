//! Job DTOs for communication with the orchestration service

use serde::{Deserialize, Serialize};

use crate::domain::job::{ExecutionMode, JobState};
use crate::domain::resource::ResourceRef;

/// Request to create a new job record
///
/// Sent by distributions and by actions spawning sub-jobs. The service
/// assigns the id and enqueues the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreateJob {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resource: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_resources: Vec<ResourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CreateJob {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target_resource: None,
            affected_resources: Vec::new(),
            execution_mode: None,
            priority: None,
            payload: None,
            parent_job: None,
            version: None,
        }
    }

    pub fn target(mut self, href: impl Into<String>) -> Self {
        self.target_resource = Some(ResourceRef::new(href));
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn parent(mut self, parent_job: impl Into<String>) -> Self {
        self.parent_job = Some(parent_job.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Partial update of a job record
///
/// Only the attributes that are set are sent to the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_resources: Option<Vec<ResourceRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested_jobs: Option<Vec<String>>,
}

impl JobEdit {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_status_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_return_code(mut self, return_code: i32) -> Self {
        self.return_code = Some(return_code);
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
