use async_trait::async_trait;
use conductor_core::domain::job::{Job, JobState};
use conductor_core::dto::job::CreateJob;
use conductor_engine::actions::{BULK_DELETE, CLEANUP_JOBS, MONITOR_BULK_ACTION};
use conductor_engine::distribution::Distribution;
use conductor_engine::distributions::{BulkActionMonitor, JobsCleanup};
use conductor_engine::distributor::Distributor;
use conductor_engine::version::ENGINE_VERSION;
use conductor_engine::{Config, actions};
use conductor_testkit::{MemoryElection, MemoryRepository, job};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tracks how many generators run at once
#[derive(Default)]
struct Concurrency {
    active: AtomicUsize,
    max: AtomicUsize,
    cycles: AtomicUsize,
}

struct Active<'a>(&'a Concurrency);

impl<'a> Active<'a> {
    fn enter(concurrency: &'a Concurrency) -> Self {
        let now = concurrency.active.fetch_add(1, Ordering::SeqCst) + 1;
        concurrency.max.fetch_max(now, Ordering::SeqCst);
        Self(concurrency)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Ticker {
    concurrency: Arc<Concurrency>,
}

#[async_trait]
impl Distribution for Ticker {
    fn name(&self) -> &'static str {
        "ticker"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_millis(5)
    }

    async fn job_generator(&self) -> anyhow::Result<Vec<CreateJob>> {
        let _active = Active::enter(&self.concurrency);
        tokio::time::sleep(Duration::from_millis(15)).await;
        self.concurrency.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(vec![CreateJob::new("ticker_job")])
    }
}

/// Panics the first time it generates
struct Flaky {
    panicked: AtomicBool,
}

#[async_trait]
impl Distribution for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn default_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn job_generator(&self) -> anyhow::Result<Vec<CreateJob>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("generator bug");
        }
        Ok(vec![CreateJob::new("flaky_job")])
    }
}

fn config(engine_id: &str) -> Config {
    let mut config = Config::default();
    config.engine_id = engine_id.to_string();
    config.supervise_interval = Duration::from_millis(20);
    config
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

#[tokio::test]
async fn test_one_generator_per_name_across_distributors() {
    let election = MemoryElection::new();
    let repository = MemoryRepository::new();
    let concurrency = Arc::new(Concurrency::default());
    let shutdown = CancellationToken::new();

    let mut runs = Vec::new();
    for engine in ["engine-a", "engine-b"] {
        let distributor = Distributor::new(
            config(engine),
            Arc::new(election.clone()),
            Arc::new(repository.clone()),
            vec![Arc::new(Ticker {
                concurrency: concurrency.clone(),
            })],
            shutdown.clone(),
        );
        runs.push(tokio::spawn(distributor.run()));
    }

    wait_for("first term", || concurrency.cycles.load(Ordering::SeqCst) >= 3).await;

    // force a failover a few times
    for _ in 0..3 {
        let cycles = concurrency.cycles.load(Ordering::SeqCst);
        election.revoke("distribution.ticker");
        wait_for("next term", || concurrency.cycles.load(Ordering::SeqCst) > cycles).await;
    }

    shutdown.cancel();
    for run in runs {
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(concurrency.max.load(Ordering::SeqCst), 1);
    assert!(election.terms("distribution.ticker") >= 4);
    assert_eq!(election.leader("distribution.ticker"), None);

    let created = repository.created();
    assert!(!created.is_empty());
    assert!(
        created
            .iter()
            .all(|job| job.version.as_deref() == Some(ENGINE_VERSION))
    );
}

#[tokio::test]
async fn test_panicked_distribution_is_restarted() {
    let election = MemoryElection::new();
    let repository = MemoryRepository::new();
    let shutdown = CancellationToken::new();

    let distributor = Distributor::new(
        config("engine-a"),
        Arc::new(election.clone()),
        Arc::new(repository.clone()),
        vec![Arc::new(Flaky {
            panicked: AtomicBool::new(false),
        })],
        shutdown.clone(),
    );
    let run = tokio::spawn(distributor.run());

    wait_for("restarted generator", || !repository.created().is_empty()).await;
    assert!(election.terms("distribution.flaky") >= 2);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_interval_override_and_only_filter() {
    let election = MemoryElection::new();
    let repository = MemoryRepository::new();
    let shutdown = CancellationToken::new();
    let repo: Arc<MemoryRepository> = Arc::new(repository.clone());

    let distributor = Distributor::new(
        config("engine-a").with_interval("jobs_cleanup", Duration::from_millis(10)),
        Arc::new(election.clone()),
        repo.clone(),
        vec![
            Arc::new(JobsCleanup),
            Arc::new(BulkActionMonitor::new(repo, actions::BULK_ACTIONS)),
        ],
        shutdown.clone(),
    )
    .only(&["jobs_cleanup".to_string()])
    .unwrap();
    let run = tokio::spawn(distributor.run());

    // the default interval is a day, so several jobs prove the override
    wait_for("cleanup jobs", || repository.created().len() >= 3).await;

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();

    assert!(repository.created().iter().all(|job| job.action == CLEANUP_JOBS));
    assert_eq!(election.terms("distribution.bulk_action_monitor"), 0);
}

#[tokio::test]
async fn test_bulk_monitor_schedules_one_monitor_per_unfinished_bulk_job() {
    let repository = MemoryRepository::new();
    repository.insert_job(Job {
        state: JobState::Success,
        progress: 50,
        ..job("job/bulk", BULK_DELETE)
    });

    let monitor = BulkActionMonitor::new(Arc::new(repository.clone()), actions::BULK_ACTIONS);

    let jobs = monitor.job_generator().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].action, MONITOR_BULK_ACTION);
    assert_eq!(jobs[0].target_resource.as_ref().unwrap().href, "job/bulk");

    // once created, the pending monitor suppresses another one
    use conductor_engine::repository::ResourceRepository;
    repository.create_job(&jobs[0]).await.unwrap();
    assert!(monitor.job_generator().await.unwrap().is_empty());
}
