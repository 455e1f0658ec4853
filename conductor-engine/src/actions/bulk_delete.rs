use async_trait::async_trait;
use conductor_core::domain::resource::SearchQuery;
use serde::{Deserialize, Serialize};

use crate::bulk::{BulkAction, ItemOutcome};
use crate::job::JobHandle;

pub const BULK_DELETE: &str = "bulk_delete";

pub const RESOURCE_NOT_FOUND: &str = "Resource not found";
pub const DELETE_FAILED: &str = "Delete failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDeletePayload {
    pub collection: String,
    pub filter: String,
}

/// Deletes every resource of a collection matching a filter
#[derive(Debug)]
pub struct BulkDelete {
    payload: BulkDeletePayload,
}

impl BulkDelete {
    pub fn new(payload: BulkDeletePayload) -> Self {
        Self { payload }
    }

    pub fn from_job(job: &JobHandle) -> anyhow::Result<Self> {
        Ok(Self::new(job.payload()?))
    }
}

#[async_trait]
impl BulkAction for BulkDelete {
    async fn get_todo(&self, job: &JobHandle) -> anyhow::Result<Vec<String>> {
        let query = SearchQuery::filter(self.payload.filter.clone()).select("id");
        let results = job
            .repository()
            .search(&self.payload.collection, &query)
            .await?;

        Ok(results
            .resources
            .iter()
            .filter_map(|resource| resource.get("id").and_then(|id| id.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn action(&self, job: &JobHandle, id: &str) -> anyhow::Result<ItemOutcome> {
        match job.repository().delete(id).await {
            Ok(response) => Ok(ItemOutcome::from_response(&response)),
            Err(e) if e.is_not_found() => Ok(ItemOutcome::skipped(RESOURCE_NOT_FOUND)),
            Err(e) if e.is_client_error() => Ok(ItemOutcome::failed(DELETE_FAILED, e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
