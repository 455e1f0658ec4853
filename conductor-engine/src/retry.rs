//! Jittered exponential backoff
//!
//! Shared by every caller that has to retry a coordination or orchestration
//! call: queue consume/release, election re-entry and the startup
//! connectivity check. The random jitter keeps a fleet of engines that failed
//! together from retrying in lockstep.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with a cap and random jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            attempts: 0,
        }
    }

    /// Backoff used around queue operations
    pub fn queue() -> Self {
        Self::new(Duration::from_millis(150), Duration::from_millis(1200))
    }

    /// Backoff used when re-entering an election or reconnecting at startup
    pub fn reconnect() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Returns the next delay and doubles the base for the one after
    ///
    /// The delay is the current base plus up to a quarter of it as jitter,
    /// never exceeding the cap.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let jitter_ms = (base.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));

        self.attempts += 1;
        self.current = (self.current * 2).min(self.max);

        (base + jitter).min(self.max)
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }
}

/// Runs `op` until it succeeds or `max_attempts` calls have failed
///
/// Sleeps with `backoff` between attempts and returns the last error.
pub async fn with_backoff<T, E, F, Fut>(
    what: &str,
    max_attempts: u32,
    mut backoff: Backoff,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));

        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));

        for _ in 0..5 {
            assert!(backoff.next_delay() <= Duration::from_millis(300));
        }
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(125));
    }

    #[tokio::test]
    async fn test_with_backoff_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2));

        let result: Result<u32, String> = with_backoff("flaky call", 5, backoff, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err(format!("attempt {}", n)) } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_backoff_gives_up() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(2));

        let result: Result<(), String> = with_backoff("broken call", 3, backoff, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
