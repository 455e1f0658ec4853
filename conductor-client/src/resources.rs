//! Generic resource endpoints

use conductor_core::domain::resource::{OperationResponse, SearchQuery, SearchResults};
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::{OrchestratorClient, handle_response};

impl OrchestratorClient {
    // =============================================================================
    // Resources
    // =============================================================================

    /// Get a resource by id
    ///
    /// # Arguments
    /// * `id` - Resource id, e.g. `deployment/8c6e...`
    pub async fn get_resource<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let url = format!("{}/api/{}", self.base_url, id);
        let response = self.request(Method::GET, &url).send().await?;

        handle_response(response).await
    }

    /// Edit a resource with a partial document
    ///
    /// # Returns
    /// The updated resource as stored by the service
    pub async fn edit_resource<B, T>(&self, id: &str, partial: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/api/{}", self.base_url, id);
        let response = self
            .request(Method::PUT, &url)
            .json(partial)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Search a collection
    ///
    /// # Arguments
    /// * `collection` - Collection name, e.g. `job`
    /// * `query` - Filter, select, ordering and page size
    pub async fn search<T: DeserializeOwned>(
        &self,
        collection: &str,
        query: &SearchQuery,
    ) -> Result<SearchResults<T>> {
        let url = format!("{}/api/{}", self.base_url, collection);
        let response = self
            .request(Method::GET, &url)
            .query(query)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Call a named operation on a resource or collection
    ///
    /// # Arguments
    /// * `id` - Resource id or collection name
    /// * `operation` - Operation name, e.g. `get-context`
    /// * `data` - Optional request body
    pub async fn operation<B: Serialize + ?Sized>(
        &self,
        id: &str,
        operation: &str,
        data: Option<&B>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/api/{}/{}", self.base_url, id, operation);
        let mut request = self.request(Method::POST, &url);
        if let Some(data) = data {
            request = request.json(data);
        }
        let response = request.send().await?;

        handle_response(response).await
    }

    /// Add a resource to a collection
    pub async fn add_resource<B: Serialize + ?Sized>(
        &self,
        collection: &str,
        resource: &B,
    ) -> Result<OperationResponse> {
        let url = format!("{}/api/{}", self.base_url, collection);
        let response = self
            .request(Method::POST, &url)
            .json(resource)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Delete a resource
    pub async fn delete_resource(&self, id: &str) -> Result<OperationResponse> {
        let url = format!("{}/api/{}", self.base_url, id);
        let response = self.request(Method::DELETE, &url).send().await?;

        handle_response(response).await
    }
}
