//! Locking queue
//!
//! An item taken off the queue is owned by exactly one consumer until it is
//! consumed or released. If the consumer dies, the coordination service lets
//! the lease expire and hands the item to someone else, so delivery is
//! at-least-once.

use async_trait::async_trait;
use conductor_client::{ClientError, CoordinationClient};
use std::time::Duration;

/// An item leased from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Lease handed out by the coordination service
    pub lease_id: String,
    /// Raw item content: the id of the job to process
    pub payload: Vec<u8>,
}

impl QueueItem {
    pub fn new(lease_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            lease_id: lease_id.into(),
            payload: payload.into(),
        }
    }

    /// Job id carried by the item, if the payload is valid UTF-8
    pub fn job_id(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload)
            .ok()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Distributed mutual-exclusion queue
#[async_trait]
pub trait CoordinationQueue: Send + Sync {
    /// Takes the next item, waiting at most `timeout`
    async fn get(&self, timeout: Duration) -> Result<Option<QueueItem>, ClientError>;

    /// Permanently removes a held item
    ///
    /// Returns `false` if the lease was no longer held.
    async fn consume(&self, item: &QueueItem) -> Result<bool, ClientError>;

    /// Returns a held item to the queue for another consumer
    async fn release(&self, item: &QueueItem) -> Result<bool, ClientError>;
}

/// HTTP implementation of CoordinationQueue
pub struct HttpCoordinationQueue {
    client: CoordinationClient,
    queue: String,
    consumer: String,
}

impl HttpCoordinationQueue {
    /// Creates a queue handle
    ///
    /// # Arguments
    /// * `client` - Coordination service client
    /// * `queue` - Queue name
    /// * `consumer` - Identifier of this consumer, recorded on every lease
    pub fn new(client: CoordinationClient, queue: String, consumer: String) -> Self {
        Self {
            client,
            queue,
            consumer,
        }
    }
}

#[async_trait]
impl CoordinationQueue for HttpCoordinationQueue {
    async fn get(&self, timeout: Duration) -> Result<Option<QueueItem>, ClientError> {
        let entry = self.client.take(&self.queue, &self.consumer, timeout).await?;
        Ok(entry.map(|entry| QueueItem::new(entry.lease_id, entry.payload)))
    }

    async fn consume(&self, item: &QueueItem) -> Result<bool, ClientError> {
        self.client.consume(&self.queue, &item.lease_id).await
    }

    async fn release(&self, item: &QueueItem) -> Result<bool, ClientError> {
        self.client.release(&self.queue, &item.lease_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_from_payload() {
        let item = QueueItem::new("lease-1", "job/abc\n");
        assert_eq!(item.job_id(), Some("job/abc"));
    }

    #[test]
    fn test_invalid_payload_has_no_job_id() {
        assert_eq!(QueueItem::new("lease-1", vec![0xff, 0xfe]).job_id(), None);
        assert_eq!(QueueItem::new("lease-2", "  ").job_id(), None);
    }
}
