use async_trait::async_trait;
use conductor_client::ClientError;
use conductor_engine::coordination::{CoordinationQueue, QueueItem};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Locking queue keeping leased items until they are consumed or released
///
/// Released items go back to the end of the queue.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Vec<u8>>,
    leased: HashMap<String, Vec<u8>>,
    next_lease: u64,
    consumed: Vec<Vec<u8>>,
    released: Vec<Vec<u8>>,
    failing_settles: u32,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job_id: &str) {
        self.push_raw(job_id.as_bytes().to_vec());
    }

    pub fn push_raw(&self, payload: Vec<u8>) {
        self.inner.lock().items.push_back(payload);
    }

    /// Items waiting to be taken
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items currently leased
    pub fn leased_count(&self) -> usize {
        self.inner.lock().leased.len()
    }

    pub fn consumed(&self) -> Vec<String> {
        to_strings(&self.inner.lock().consumed)
    }

    pub fn released(&self) -> Vec<String> {
        to_strings(&self.inner.lock().released)
    }

    /// Makes the next `count` consume/release calls fail with a 503
    pub fn fail_next_settles(&self, count: u32) {
        self.inner.lock().failing_settles = count;
    }

    fn settle(&self, item: &QueueItem, requeue: bool) -> Result<bool, ClientError> {
        let mut state = self.inner.lock();

        if state.failing_settles > 0 {
            state.failing_settles -= 1;
            return Err(ClientError::api_error(503, "coordination service unavailable"));
        }

        let Some(payload) = state.leased.remove(&item.lease_id) else {
            return Ok(false);
        };

        if requeue {
            state.released.push(payload.clone());
            state.items.push_back(payload);
        } else {
            state.consumed.push(payload);
        }

        Ok(true)
    }
}

fn to_strings(payloads: &[Vec<u8>]) -> Vec<String> {
    payloads
        .iter()
        .map(|payload| String::from_utf8_lossy(payload).into_owned())
        .collect()
}

#[async_trait]
impl CoordinationQueue for MemoryQueue {
    async fn get(&self, timeout: Duration) -> Result<Option<QueueItem>, ClientError> {
        {
            let mut state = self.inner.lock();
            if let Some(payload) = state.items.pop_front() {
                state.next_lease += 1;
                let lease_id = format!("lease-{}", state.next_lease);
                state.leased.insert(lease_id.clone(), payload.clone());
                return Ok(Some(QueueItem::new(lease_id, payload)));
            }
        }

        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn consume(&self, item: &QueueItem) -> Result<bool, ClientError> {
        self.settle(item, false)
    }

    async fn release(&self, item: &QueueItem) -> Result<bool, ClientError> {
        self.settle(item, true)
    }
}
