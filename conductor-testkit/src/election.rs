use async_trait::async_trait;
use conductor_engine::coordination::{Election, Leadership};
use conductor_engine::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Election granting each topic to at most one participant at a time
///
/// A leadership ends when it is resigned, revoked, or dropped by a holder
/// that died.
#[derive(Clone, Default)]
pub struct MemoryElection {
    inner: Arc<Mutex<ElectionState>>,
}

#[derive(Default)]
struct ElectionState {
    leaders: HashMap<String, Leader>,
    terms: HashMap<String, usize>,
    next_lease: u64,
}

struct Leader {
    participant: String,
    lease_id: String,
    lost: CancellationToken,
}

impl ElectionState {
    fn vacate(&mut self, topic: &str, lease_id: &str) {
        if self
            .leaders
            .get(topic)
            .is_some_and(|leader| leader.lease_id == lease_id)
        {
            self.leaders.remove(topic);
        }
    }
}

impl MemoryElection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current leader of a topic
    pub fn leader(&self, topic: &str) -> Option<String> {
        self.inner
            .lock()
            .leaders
            .get(topic)
            .map(|leader| leader.participant.clone())
    }

    /// Number of leaderships granted on a topic
    pub fn terms(&self, topic: &str) -> usize {
        self.inner.lock().terms.get(topic).copied().unwrap_or(0)
    }

    /// Takes leadership away from the current holder, as an expired lease would
    pub fn revoke(&self, topic: &str) {
        if let Some(leader) = self.inner.lock().leaders.remove(topic) {
            leader.lost.cancel();
        }
    }

    fn try_acquire(&self, topic: &str, participant: &str) -> Option<Leadership> {
        let mut state = self.inner.lock();
        if state.leaders.contains_key(topic) {
            return None;
        }

        state.next_lease += 1;
        let lease_id = format!("term-{}", state.next_lease);
        let leadership = Leadership::new(topic, participant, lease_id.clone());

        state.leaders.insert(
            topic.to_string(),
            Leader {
                participant: participant.to_string(),
                lease_id: lease_id.clone(),
                lost: leadership.lost(),
            },
        );
        *state.terms.entry(topic.to_string()).or_default() += 1;
        drop(state);

        // a holder dropping its leadership without resigning frees the topic
        let inner = self.inner.clone();
        let lost = leadership.lost();
        let topic = topic.to_string();
        tokio::spawn(async move {
            lost.cancelled().await;
            inner.lock().vacate(&topic, &lease_id);
        });

        Some(leadership)
    }
}

#[async_trait]
impl Election for MemoryElection {
    async fn campaign(&self, topic: &str, participant: &str) -> Result<Leadership> {
        loop {
            if let Some(leadership) = self.try_acquire(topic, participant) {
                return Ok(leadership);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn resign(&self, leadership: Leadership) {
        self.inner
            .lock()
            .vacate(leadership.topic(), leadership.lease_id());
    }
}
