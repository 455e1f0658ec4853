//! Leader election
//!
//! One participant per topic holds leadership at a time. Leadership is a
//! lease: the holder keeps renewing it, and if renewal stops (crash, network
//! partition) the lease expires and another participant is elected.

use anyhow::anyhow;
use async_trait::async_trait;
use conductor_client::CoordinationClient;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::retry::Backoff;

/// Leadership of one topic, held until resigned or lost
///
/// Dropping it cancels the `lost` token, which stops lease renewal, so a
/// holder that dies without resigning lets its lease run out.
#[derive(Debug)]
pub struct Leadership {
    topic: String,
    participant: String,
    lease_id: String,
    lost: CancellationToken,
}

impl Leadership {
    pub fn new(topic: &str, participant: &str, lease_id: impl Into<String>) -> Self {
        Self {
            topic: topic.to_string(),
            participant: participant.to_string(),
            lease_id: lease_id.into(),
            lost: CancellationToken::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    /// Token cancelled once leadership can no longer be guaranteed
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }
}

impl Drop for Leadership {
    fn drop(&mut self) {
        self.lost.cancel();
    }
}

/// Distributed leader election keyed by topic
#[async_trait]
pub trait Election: Send + Sync {
    /// Blocks until `participant` is leader of `topic`
    async fn campaign(&self, topic: &str, participant: &str) -> Result<Leadership>;

    /// Gives up leadership
    async fn resign(&self, leadership: Leadership);
}

/// Runs `callback` while holding leadership of `topic`
///
/// Campaigns until elected or until `stop` is cancelled, in which case the
/// callback never runs. The callback gets a child of `stop` and is dropped as
/// soon as leadership is lost, so two participants never run it concurrently.
/// Leadership is resigned on every exit path.
pub async fn lead<F, Fut>(
    election: &dyn Election,
    topic: &str,
    participant: &str,
    stop: &CancellationToken,
    callback: F,
) -> anyhow::Result<()>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let leadership = tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        leadership = election.campaign(topic, participant) => leadership?,
    };
    info!("{} elected leader of {}", participant, topic);

    let lost = leadership.lost();
    let result = tokio::select! {
        result = callback(stop.child_token()) => result,
        _ = lost.cancelled() => Err(anyhow!("leadership of {} lost", topic)),
    };

    election.resign(leadership).await;
    debug!("{} resigned leadership of {}", participant, topic);

    result
}

/// HTTP implementation of Election
///
/// A keeper task renews the lease every third of its lifetime and cancels
/// the leadership token once the lease can no longer be renewed before it
/// expires.
pub struct HttpElection {
    client: CoordinationClient,
    ttl: Duration,
    poll_interval: Duration,
}

impl HttpElection {
    /// Creates an election handle
    ///
    /// # Arguments
    /// * `client` - Coordination service client
    /// * `ttl` - Lifetime of a leadership lease
    pub fn new(client: CoordinationClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            poll_interval: ttl / 3,
        }
    }

    fn spawn_keeper(&self, leadership: &Leadership, granted_at: Instant) {
        let client = self.client.clone();
        let topic = leadership.topic.clone();
        let lease_id = leadership.lease_id.clone();

        let renew = move || {
            let client = client.clone();
            let topic = topic.clone();
            let lease_id = lease_id.clone();
            async move { client.renew(&topic, &lease_id).await }
        };

        tokio::spawn(keep_lease(
            leadership.topic.clone(),
            self.ttl,
            granted_at,
            leadership.lost(),
            renew,
        ));
    }
}

/// Renews a lease every third of its ttl until `lost` is cancelled
///
/// Cancels `lost` itself once the lease is taken over or cannot be renewed
/// before it expires. A renewal is only awaited until shortly before the
/// current expiry, so a hanging request cannot outlive the lease.
async fn keep_lease<F, Fut>(
    topic: String,
    ttl: Duration,
    granted_at: Instant,
    lost: CancellationToken,
    mut renew: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = conductor_client::Result<bool>>,
{
    let renew_every = ttl / 3;
    let margin = ttl / 10;
    let mut expires_at = granted_at + ttl;

    loop {
        tokio::select! {
            _ = lost.cancelled() => return,
            _ = tokio::time::sleep(renew_every) => {}
        }

        let deadline = expires_at - margin;
        let sent_at = Instant::now();
        let renewed = tokio::select! {
            _ = lost.cancelled() => return,
            renewed = tokio::time::timeout_at(deadline, renew()) => renewed,
        };

        match renewed {
            Ok(Ok(true)) => {
                // the server counts the new term from before our request arrived
                expires_at = sent_at + ttl;
            }
            Ok(Ok(false)) => {
                warn!("Leadership of {} taken over", topic);
                lost.cancel();
                return;
            }
            Ok(Err(e)) if Instant::now() + renew_every >= deadline => {
                warn!("Cannot renew leadership of {} before expiry: {}", topic, e);
                lost.cancel();
                return;
            }
            Ok(Err(e)) => {
                warn!("Failed to renew leadership of {}: {}", topic, e);
            }
            Err(_) => {
                warn!("Renewal of leadership of {} did not answer before expiry", topic);
                lost.cancel();
                return;
            }
        }
    }
}

#[async_trait]
impl Election for HttpElection {
    async fn campaign(&self, topic: &str, participant: &str) -> Result<Leadership> {
        let mut backoff = Backoff::reconnect();

        loop {
            let requested_at = Instant::now();
            match self.client.campaign(topic, participant, self.ttl).await {
                Ok(Some(lease)) => {
                    let leadership = Leadership::new(topic, participant, lease.lease_id);
                    self.spawn_keeper(&leadership, requested_at);
                    return Ok(leadership);
                }
                Ok(None) => {
                    backoff.reset();
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!("Election on {} unavailable: {}; retrying in {:?}", topic, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(EngineError::Client(e)),
            }
        }
    }

    async fn resign(&self, leadership: Leadership) {
        leadership.lost.cancel();

        if let Err(e) = self
            .client
            .resign(&leadership.topic, &leadership.lease_id)
            .await
        {
            warn!(
                "Failed to resign leadership of {}, it will expire: {}",
                leadership.topic, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropping_leadership_cancels_token() {
        let leadership = Leadership::new("distribution.jobs_cleanup", "engine-1", "lease-1");
        let lost = leadership.lost();
        assert!(!lost.is_cancelled());

        drop(leadership);
        assert!(lost.is_cancelled());
    }

    const TTL: Duration = Duration::from_millis(90);

    #[tokio::test]
    async fn test_hanging_renewal_gives_up_before_expiry() {
        let lost = CancellationToken::new();
        let granted_at = Instant::now();

        tokio::spawn(keep_lease(
            "distribution.jobs_cleanup".to_string(),
            TTL,
            granted_at,
            lost.clone(),
            || std::future::pending::<conductor_client::Result<bool>>(),
        ));

        tokio::time::timeout(Duration::from_secs(2), lost.cancelled())
            .await
            .unwrap();
        assert!(Instant::now() < granted_at + TTL + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_renewal_keeps_leadership_until_taken_over() {
        let lost = CancellationToken::new();
        let renewals = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = renewals.clone();
        tokio::spawn(keep_lease(
            "distribution.jobs_cleanup".to_string(),
            TTL,
            Instant::now(),
            lost.clone(),
            move || {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move { Ok(n < 4) }
            },
        ));

        tokio::time::timeout(Duration::from_secs(2), lost.cancelled())
            .await
            .unwrap();
        assert_eq!(renewals.load(std::sync::atomic::Ordering::SeqCst), 5);
    }
}
