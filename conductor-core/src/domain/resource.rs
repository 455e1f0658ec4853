//! Orchestration service resource types

use serde::{Deserialize, Serialize};

/// Reference to another resource held by the orchestration service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub href: String,
}

impl ResourceRef {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

/// Collection search parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orderby: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<u32>,
}

impl SearchQuery {
    pub fn filter(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Self::default()
        }
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn last(mut self, last: u32) -> Self {
        self.last = Some(last);
        self
    }
}

/// Result page of a collection search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults<T> {
    pub count: u64,
    pub resources: Vec<T>,
}

impl<T> Default for SearchResults<T> {
    fn default() -> Self {
        Self {
            count: 0,
            resources: Vec::new(),
        }
    }
}

/// Response of a resource operation (add, delete, custom operations)
///
/// The status mirrors the HTTP status the service reported: 200/201 for a
/// completed operation, 202 when the work was queued as a sub-job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationResponse {
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl OperationResponse {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, 200 | 201)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == 202
    }
}
