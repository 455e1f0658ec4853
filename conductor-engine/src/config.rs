//! Engine configuration
//!
//! Defines the configurable parameters shared by the executor and the
//! distributor: service endpoints, credentials, polling and election timing,
//! and per-distribution interval overrides.

use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Engine configuration
///
/// Timeouts and intervals are configurable to allow tuning for different
/// deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier of this engine instance, used as queue consumer
    /// and election participant id
    pub engine_id: String,

    /// Orchestration service base URL (e.g., "http://localhost:8200")
    pub orchestrator_url: String,

    /// API key and secret for the orchestration service
    pub api_key: Option<String>,
    pub api_secret: Option<String>,

    /// Coordination service base URL (queue and election)
    pub coordination_url: String,

    /// Name of the job queue
    pub queue_name: String,

    /// How long a single queue poll may block
    pub poll_timeout: Duration,

    /// Lifetime of a leadership lease; renewed every third of it
    pub election_ttl: Duration,

    /// How often the distributor checks its distribution tasks
    pub supervise_interval: Duration,

    /// Interval overrides keyed by distribution name
    pub distribution_intervals: HashMap<String, Duration>,

    /// Engine major versions that still accept jobs two majors behind
    pub extended_floor_majors: Vec<u64>,

    /// Attempts for queue consume/release before leaving the item to lease expiry
    pub queue_retry_attempts: u32,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(engine_id: String, orchestrator_url: String, coordination_url: String) -> Self {
        Self {
            engine_id,
            orchestrator_url,
            api_key: None,
            api_secret: None,
            coordination_url,
            queue_name: "job".to_string(),
            poll_timeout: Duration::from_secs(5),
            election_ttl: Duration::from_secs(15),
            supervise_interval: Duration::from_secs(5),
            distribution_intervals: HashMap::new(),
            extended_floor_majors: Vec::new(),
            queue_retry_attempts: 5,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - ENGINE_ID (optional, default: random uuid)
    /// - ORCHESTRATOR_URL (optional, default: http://localhost:8200)
    /// - ORCHESTRATOR_API_KEY / ORCHESTRATOR_API_SECRET (optional)
    /// - COORDINATION_URL (optional, default: http://localhost:8300)
    /// - QUEUE_NAME (optional, default: job)
    /// - POLL_TIMEOUT (optional, seconds, default: 5)
    /// - ELECTION_TTL (optional, seconds, default: 15)
    /// - DISTRIBUTION_INTERVALS (optional, e.g. "jobs_cleanup=3600,bulk_action_monitor=10")
    /// - EXTENDED_FLOOR_MAJORS (optional, e.g. "4,7")
    ///
    /// Only absent variables fall back to defaults; a variable that is set
    /// but cannot be parsed is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Creates configuration from a variable lookup
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let orchestrator_url = var("ORCHESTRATOR_URL").unwrap_or_else(|| {
            info!("ORCHESTRATOR_URL not set, using {}", defaults.orchestrator_url);
            defaults.orchestrator_url.clone()
        });

        let coordination_url = var("COORDINATION_URL").unwrap_or_else(|| {
            info!("COORDINATION_URL not set, using {}", defaults.coordination_url);
            defaults.coordination_url.clone()
        });

        let engine_id = var("ENGINE_ID").unwrap_or(defaults.engine_id);
        let mut config = Self::new(engine_id, orchestrator_url, coordination_url);

        config.api_key = var("ORCHESTRATOR_API_KEY");
        config.api_secret = var("ORCHESTRATOR_API_SECRET");

        if let Some(queue_name) = var("QUEUE_NAME") {
            config.queue_name = queue_name;
        }

        if let Some(timeout) = var("POLL_TIMEOUT") {
            config.poll_timeout = parse_secs("POLL_TIMEOUT", &timeout)?;
        }

        if let Some(ttl) = var("ELECTION_TTL") {
            config.election_ttl = parse_secs("ELECTION_TTL", &ttl)?;
        }

        if let Some(intervals) = var("DISTRIBUTION_INTERVALS") {
            config.distribution_intervals = parse_intervals(&intervals)?;
        }

        if let Some(majors) = var("EXTENDED_FLOOR_MAJORS") {
            config.extended_floor_majors = parse_majors(&majors)?;
        }

        Ok(config)
    }

    /// Overrides the interval of one distribution
    pub fn with_interval(mut self, distribution: &str, interval: Duration) -> Self {
        self.distribution_intervals
            .insert(distribution.to_string(), interval);
        self
    }

    /// Interval of a distribution, falling back to its own default
    pub fn interval_for(&self, distribution: &str, default: Duration) -> Duration {
        self.distribution_intervals
            .get(distribution)
            .copied()
            .unwrap_or(default)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine_id.is_empty() {
            anyhow::bail!("engine_id cannot be empty");
        }

        for (name, url) in [
            ("orchestrator_url", &self.orchestrator_url),
            ("coordination_url", &self.coordination_url),
        ] {
            if url.is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }

            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.api_key.is_some() != self.api_secret.is_some() {
            anyhow::bail!("api_key and api_secret must be set together");
        }

        if self.queue_name.is_empty() {
            anyhow::bail!("queue_name cannot be empty");
        }

        if self.poll_timeout.is_zero() {
            anyhow::bail!("poll_timeout must be greater than 0");
        }

        if self.election_ttl.as_secs() < 3 {
            anyhow::bail!("election_ttl must be at least 3 seconds");
        }

        if let Some((name, _)) = self
            .distribution_intervals
            .iter()
            .find(|(_, interval)| interval.is_zero())
        {
            anyhow::bail!("interval of distribution {} must be greater than 0", name);
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8200".to_string(),
            "http://localhost:8300".to_string(),
        )
    }
}

fn parse_secs(name: &str, raw: &str) -> anyhow::Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", name, raw, e))
}

/// Parses "name=secs,name=secs"
fn parse_intervals(raw: &str) -> anyhow::Result<HashMap<String, Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, secs) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid distribution interval '{}'", entry))?;
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("invalid interval for {}: {}", name, e))?;
            Ok((name.trim().to_string(), Duration::from_secs(secs)))
        })
        .collect()
}

fn parse_majors(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| anyhow::anyhow!("invalid major version '{}': {}", s, e))
        })
        .collect()
}
