//! Conductor HTTP Client
//!
//! Type-safe HTTP clients for the two services the job engine depends on:
//! - [`OrchestratorClient`]: the orchestration service holding resources and job records
//! - [`CoordinationClient`]: the locking queue and leader election service
//!
//! # Example
//!
//! ```no_run
//! use conductor_client::OrchestratorClient;
//!
//! # async fn example() -> conductor_client::Result<()> {
//! let client = OrchestratorClient::new("http://localhost:8200")
//!     .with_credentials("credential/key", "secret");
//!
//! let job = client.get_job("job/1234").await?;
//! println!("{} is {}", job.id, job.state);
//! # Ok(())
//! # }
//! ```

mod coordination;
pub mod error;
mod jobs;
mod resources;

// Re-export commonly used types
pub use coordination::CoordinationClient;
pub use error::{ClientError, Result};
pub use jobs::JOB_COLLECTION;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

/// HTTP client for the orchestration service API
///
/// Methods are organized into logical groups:
/// - Generic resources (get, edit, search, operation, add, delete)
/// - Job records (get, edit, create, context)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestration service (e.g., "http://localhost:8200")
    base_url: String,
    /// API key credentials, sent as basic auth
    credentials: Option<(String, String)>,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestration service client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the service (e.g., "http://localhost:8200")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            client,
        }
    }

    /// Authenticate every request with an API key/secret pair
    pub fn with_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some((key.into(), secret.into()));
        self
    }

    /// Get the base URL of the orchestration service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the service answers at all
    ///
    /// Fetches the cloud entry point, which every deployment serves
    /// without authentication.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/cloud-entry-point", self.base_url);
        let response = self.request(Method::GET, &url).send().await?;

        handle_empty_response(response).await
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((key, secret)) => builder.basic_auth(key, Some(secret)),
            None => builder,
        }
    }
}

// =============================================================================
// Response Handlers
// =============================================================================

/// Handle an API response and deserialize JSON
///
/// Checks the status code and returns an appropriate error if the request
/// failed, or deserializes the response body if successful.
pub(crate) async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        return Err(error_from(status, response).await);
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Handle an API response that returns no content
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        return Err(error_from(status, response).await);
    }

    Ok(())
}

async fn error_from(status: StatusCode, response: reqwest::Response) -> ClientError {
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    tracing::debug!("API responded {}: {}", status, error_text);
    ClientError::api_error(status.as_u16(), error_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8200");
        assert_eq!(client.base_url(), "http://localhost:8200");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8200/");
        assert_eq!(client.base_url(), "http://localhost:8200");
    }

    #[test]
    fn test_client_with_credentials() {
        let client = OrchestratorClient::new("http://localhost:8200")
            .with_credentials("credential/abc", "s3cr3t");
        assert_eq!(
            client.credentials,
            Some(("credential/abc".to_string(), "s3cr3t".to_string()))
        );
    }
}
