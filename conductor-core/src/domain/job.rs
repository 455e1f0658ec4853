//! Job domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::resource::ResourceRef;

/// Version assumed for job records that do not declare one.
pub const UNVERSIONED_JOB: &str = "0.0.1";

/// Job record
///
/// Structure owned by the orchestration service (persists) and mutated by
/// the executor holding the job's queue lease. Attribute names follow the
/// service's kebab-case wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Job {
    pub id: String,
    pub action: String,
    pub state: JobState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource: Option<ResourceRef>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_resources: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_jobs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl Job {
    /// Declared protocol version of the producer, or the legacy default
    pub fn version_or_default(&self) -> &str {
        self.version.as_deref().unwrap_or(UNVERSIONED_JOB)
    }

    pub fn is_in_final_state(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Job execution state
///
/// QUEUED -> RUNNING -> {SUCCESS, FAILED, CANCELED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Canceled)
    }

    fn rank(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Running => 1,
            JobState::Success | JobState::Failed | JobState::Canceled => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Terminal states are absorbing, including re-entering the same terminal
    /// state. Re-asserting a non-terminal state is allowed.
    pub fn can_transition_to(self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// Whether work is pushed to the target or pulled by it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Push,
    Pull,
    Mixed,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Push => "push",
            ExecutionMode::Pull => "pull",
            ExecutionMode::Mixed => "mixed",
        };
        f.write_str(s)
    }
}
