//! Executor dispatch loop
//!
//! Drains the coordination queue one job at a time. For every item the
//! executor loads the job, checks it can be processed, runs the registered
//! handler and records the terminal state. Each exit path maps to exactly one
//! queue disposition: a job whose state was durably updated is consumed, a job
//! left untouched is released for another consumer.

use conductor_client::ClientError;
use conductor_core::domain::job::{ExecutionMode, JobState};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::coordination::{CoordinationQueue, QueueItem};
use crate::error::EngineError;
use crate::job::JobHandle;
use crate::registry::ActionRegistry;
use crate::repository::ResourceRepository;
use crate::retry::{Backoff, with_backoff};
use crate::version::{Compatibility, VersionGate};

/// Return code recorded when the engine fails a job itself
const ENGINE_FAILURE_CODE: i32 = 1;

/// Result of handling one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The job record no longer exists
    NotFound,
    /// The job record could not be read
    Unavailable,
    /// The job was already terminal when dequeued
    AlreadyFinal(JobState),
    /// Queue item did not carry a job id
    InvalidItem,
    /// Produced by an engine older than the supported floor; failed in place
    TooOld,
    /// Produced by a newer engine; left for an upgraded consumer
    TooNew,
    /// No handler registered for the action; failed in place
    NotImplemented,
    /// The handler ran and its terminal state was recorded
    Completed { state: JobState, return_code: i32 },
    /// The handler failed on a mixed-mode job, which was put back in pull mode
    Requeued,
    /// A state change could not be persisted
    UpdateFailed,
}

/// What happens to the queue item once a job has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Consume,
    Release,
}

impl Outcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Outcome::NotFound
            | Outcome::AlreadyFinal(_)
            | Outcome::InvalidItem
            | Outcome::TooOld
            | Outcome::NotImplemented
            | Outcome::Completed { .. } => Disposition::Consume,
            Outcome::Unavailable | Outcome::TooNew | Outcome::Requeued | Outcome::UpdateFailed => {
                Disposition::Release
            }
        }
    }
}

/// Queue consumer running one job at a time
pub struct Executor {
    config: Config,
    queue: Arc<dyn CoordinationQueue>,
    repository: Arc<dyn ResourceRepository>,
    registry: Arc<ActionRegistry>,
    gate: VersionGate,
    shutdown: CancellationToken,
}

impl Executor {
    /// Creates an executor
    ///
    /// # Arguments
    /// * `config` - Engine configuration
    /// * `queue` - Queue the jobs are taken from
    /// * `repository` - Orchestration service holding the job records
    /// * `registry` - Handlers by action name
    /// * `shutdown` - Cancelled to stop the loop at the next dequeue
    pub fn new(
        config: Config,
        queue: Arc<dyn CoordinationQueue>,
        repository: Arc<dyn ResourceRepository>,
        registry: Arc<ActionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let gate = VersionGate::current(&config.extended_floor_majors);
        Self {
            config,
            queue,
            repository,
            registry,
            gate,
            shutdown,
        }
    }

    /// Replaces the version gate derived from the crate version
    pub fn with_gate(mut self, gate: VersionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &VersionGate {
        &self.gate
    }

    /// Consumes the queue until shutdown
    pub async fn run(&self) {
        info!(
            "Executor {} consuming queue '{}' (job versions {}, {} actions)",
            self.config.engine_id,
            self.config.queue_name,
            self.gate,
            self.registry.len()
        );

        let mut backoff = Backoff::reconnect();

        while !self.shutdown.is_cancelled() {
            match self.process_next().await {
                Ok(_) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Queue unavailable: {}; retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Executor {} stopped", self.config.engine_id);
    }

    /// Processes one job without going through the queue
    pub async fn run_single(&self, job_id: &str) -> Outcome {
        info!("Processing single job {}", job_id);
        let outcome = self.process_job(job_id).await;
        info!("Job {} finished: {:?}", job_id, outcome);
        outcome
    }

    /// Takes one item off the queue and handles it
    ///
    /// Returns `Ok(None)` when the poll timed out or shutdown was requested.
    pub async fn process_next(&self) -> Result<Option<Outcome>, ClientError> {
        let item = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(None),
            item = self.queue.get(self.config.poll_timeout) => item?,
        };

        let Some(item) = item else {
            return Ok(None);
        };

        let outcome = match item.job_id() {
            Some(job_id) => {
                let job_id = job_id.to_string();
                let outcome = self.process_job(&job_id).await;
                debug!("Job {} handled: {:?}", job_id, outcome);
                outcome
            }
            None => {
                error!("Dropping queue item {} without a job id", item.lease_id);
                Outcome::InvalidItem
            }
        };

        self.settle(&item, outcome.disposition()).await;
        Ok(Some(outcome))
    }

    /// Runs a job through the version gate and its handler
    pub async fn process_job(&self, job_id: &str) -> Outcome {
        let mut job = match JobHandle::fetch(self.repository.clone(), job_id).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                warn!("Job {} not found, dropping it", job_id);
                return Outcome::NotFound;
            }
            Err(e) => {
                error!("Failed to load job {}: {}", job_id, e);
                return Outcome::Unavailable;
            }
        };

        if job.is_in_final_state() {
            info!("Job {} is already {}, skipping", job_id, job.state());
            return Outcome::AlreadyFinal(job.state());
        }

        let version = job.record().version_or_default().to_string();
        match self.gate.check(&version) {
            Compatibility::Supported => {}
            Compatibility::TooNew => {
                info!(
                    "Job {} has version {}, newer than this engine ({}); leaving it",
                    job_id,
                    version,
                    self.gate.engine_version()
                );
                return Outcome::TooNew;
            }
            Compatibility::TooOld { floor } => {
                let message = format!(
                    "Job version {} is older than the oldest supported version {}",
                    version, floor
                );
                return self.fail_in_place(&mut job, message, Outcome::TooOld).await;
            }
            Compatibility::Invalid(reason) => {
                let message = format!("Job version is invalid: {}", reason);
                return self.fail_in_place(&mut job, message, Outcome::TooOld).await;
            }
        }

        let action = job.action().to_string();
        let provider = match self.registry.get(&action) {
            Ok(provider) => provider,
            Err(e) => {
                return self
                    .fail_in_place(&mut job, e.to_string(), Outcome::NotImplemented)
                    .await;
            }
        };

        if let Err(e) = job.set_state(JobState::Running).await {
            error!("Failed to mark job {} running: {}", job_id, e);
            return Outcome::UpdateFailed;
        }

        info!("Running job {} ({})", job_id, action);

        let result = AssertUnwindSafe(async {
            let mut handler = provider.build(&job)?;
            handler.do_work(&mut job).await
        })
        .catch_unwind()
        .await;

        let error = match result {
            Ok(Ok(return_code)) => return self.record_completion(&mut job, return_code).await,
            Ok(Err(e)) => e,
            Err(panic) => anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref())),
        };

        // the handler's own edit was not stored; leave the job as it is so
        // the next consumer picks up from the last stored state
        if error
            .downcast_ref::<EngineError>()
            .is_some_and(EngineError::is_job_update)
        {
            error!("Job {} ({}) lost an update: {:#}", job_id, action, error);
            return Outcome::UpdateFailed;
        }

        if job.is_in_final_state() {
            warn!(
                "Job {} ({}) failed after reaching {}: {:#}",
                job_id,
                action,
                job.state(),
                error
            );
            return Outcome::Completed {
                state: job.state(),
                return_code: job.record().return_code.unwrap_or(ENGINE_FAILURE_CODE),
            };
        }

        error!("Job {} ({}) failed: {:?}", job_id, action, error);
        let message = format!("{} failed: {:#}", action, error);

        if job.execution_mode() == ExecutionMode::Mixed {
            return match job.requeue_in_pull_mode(message).await {
                Ok(()) => {
                    info!("Job {} requeued in pull mode", job_id);
                    Outcome::Requeued
                }
                Err(e) => {
                    error!("Failed to requeue job {}: {}", job_id, e);
                    Outcome::UpdateFailed
                }
            };
        }

        match job.fail(message, ENGINE_FAILURE_CODE).await {
            Ok(()) => Outcome::Completed {
                state: job.state(),
                return_code: ENGINE_FAILURE_CODE,
            },
            Err(e) => {
                error!("Failed to record failure of job {}: {}", job_id, e);
                Outcome::UpdateFailed
            }
        }
    }

    async fn record_completion(&self, job: &mut JobHandle, return_code: i32) -> Outcome {
        // the handler may have settled the job itself
        if job.is_in_final_state() {
            debug!("Job {} already set to {} by its handler", job.id(), job.state());
            return Outcome::Completed {
                state: job.state(),
                return_code: job.record().return_code.unwrap_or(return_code),
            };
        }

        match job.complete(return_code).await {
            Ok(()) => {
                info!("Job {} finished with {}", job.id(), job.state());
                Outcome::Completed {
                    state: job.state(),
                    return_code,
                }
            }
            Err(e) => {
                error!("Failed to record completion of job {}: {}", job.id(), e);
                Outcome::UpdateFailed
            }
        }
    }

    async fn fail_in_place(&self, job: &mut JobHandle, message: String, outcome: Outcome) -> Outcome {
        warn!("Failing job {}: {}", job.id(), message);

        match job.fail(message, ENGINE_FAILURE_CODE).await {
            Ok(()) => outcome,
            Err(e) => {
                error!("Failed to fail job {}: {}", job.id(), e);
                Outcome::UpdateFailed
            }
        }
    }

    async fn settle(&self, item: &QueueItem, disposition: Disposition) {
        let attempts = self.config.queue_retry_attempts;
        let result = match disposition {
            Disposition::Consume => {
                with_backoff("Consuming queue item", attempts, Backoff::queue(), || {
                    self.queue.consume(item)
                })
                .await
            }
            Disposition::Release => {
                with_backoff("Releasing queue item", attempts, Backoff::queue(), || {
                    self.queue.release(item)
                })
                .await
            }
        };

        match result {
            Ok(true) => {}
            Ok(false) => warn!(
                "Lease {} was no longer held when settling ({:?})",
                item.lease_id, disposition
            ),
            Err(e) => error!(
                "Could not settle lease {} ({:?}), it will expire: {}",
                item.lease_id, disposition, e
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
