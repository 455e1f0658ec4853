//! Coordination service DTOs
//!
//! Wire types of the locking queue and leader election endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to take the next item off a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeRequest {
    /// Identifier of the consumer holding the lease
    pub consumer: String,

    /// How long the service may hold the request open waiting for an item
    pub timeout_ms: u64,
}

/// Queue item leased to a single consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeasedEntry {
    pub lease_id: String,
    pub payload: String,
}

/// Request to become leader of a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRequest {
    pub participant: String,
    pub ttl_secs: u64,
}

/// Leadership lease granted by the election service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderLease {
    pub lease_id: String,
    pub expires_at: DateTime<Utc>,
}
