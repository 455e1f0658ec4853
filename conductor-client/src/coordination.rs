//! Coordination service endpoints
//!
//! The coordination service provides two primitives:
//! - a locking queue: an item taken by one consumer is invisible to others
//!   until it is consumed, released, or its lease expires
//! - leader election: one leader per topic, held through a renewable lease

use conductor_core::dto::coordination::{CampaignRequest, LeaderLease, LeasedEntry, TakeRequest};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::Result;
use crate::{handle_empty_response, handle_response};

/// HTTP client for the coordination service
#[derive(Debug, Clone)]
pub struct CoordinationClient {
    base_url: String,
    client: Client,
}

impl CoordinationClient {
    /// Create a new coordination service client
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Get the base URL of the coordination service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Locking Queue
    // =============================================================================

    /// Take the next item off a queue, waiting at most `timeout`
    ///
    /// # Returns
    /// `None` when the queue stayed empty for the whole timeout
    pub async fn take(
        &self,
        queue: &str,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<LeasedEntry>> {
        let url = format!("{}/api/queue/{}/take", self.base_url, queue);
        let response = self
            .client
            .post(&url)
            // leave the server room to answer before the client gives up
            .timeout(timeout + Duration::from_secs(5))
            .json(&TakeRequest {
                consumer: consumer.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        handle_response(response).await.map(Some)
    }

    /// Permanently remove a leased item
    ///
    /// # Returns
    /// `false` if the lease was no longer held (expired or already settled)
    pub async fn consume(&self, queue: &str, lease_id: &str) -> Result<bool> {
        self.settle(queue, lease_id, "consume").await
    }

    /// Return a leased item to the queue for another consumer
    pub async fn release(&self, queue: &str, lease_id: &str) -> Result<bool> {
        self.settle(queue, lease_id, "release").await
    }

    async fn settle(&self, queue: &str, lease_id: &str, verb: &str) -> Result<bool> {
        let url = format!(
            "{}/api/queue/{}/leases/{}/{}",
            self.base_url, queue, lease_id, verb
        );
        let response = self.client.post(&url).send().await?;

        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(false);
        }

        handle_empty_response(response).await.map(|_| true)
    }

    // =============================================================================
    // Leader Election
    // =============================================================================

    /// Try to become leader of a topic
    ///
    /// # Returns
    /// The granted lease, or `None` if another participant holds the topic
    pub async fn campaign(
        &self,
        topic: &str,
        participant: &str,
        ttl: Duration,
    ) -> Result<Option<LeaderLease>> {
        let url = format!("{}/api/election/{}/campaign", self.base_url, topic);
        let response = self
            .client
            .post(&url)
            .json(&CampaignRequest {
                participant: participant.to_string(),
                ttl_secs: ttl.as_secs().max(1),
            })
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(None);
        }

        handle_response(response).await.map(Some)
    }

    /// Extend a leadership lease
    ///
    /// # Returns
    /// `false` if leadership was lost in the meantime
    pub async fn renew(&self, topic: &str, lease_id: &str) -> Result<bool> {
        let url = format!(
            "{}/api/election/{}/leases/{}/renew",
            self.base_url, topic, lease_id
        );
        let response = self.client.post(&url).send().await?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::GONE
        ) {
            return Ok(false);
        }

        handle_empty_response(response).await.map(|_| true)
    }

    /// Give up leadership so another participant can take over immediately
    pub async fn resign(&self, topic: &str, lease_id: &str) -> Result<()> {
        let url = format!(
            "{}/api/election/{}/leases/{}",
            self.base_url, topic, lease_id
        );
        let response = self.client.delete(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordination_client_trims_trailing_slash() {
        let client = CoordinationClient::new("http://localhost:2181/");
        assert_eq!(client.base_url(), "http://localhost:2181");
    }
}
