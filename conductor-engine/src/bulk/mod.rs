//! Bulk action engine
//!
//! Runs one operation over a server-computed set of resource ids. Every
//! element is classified and recorded in a `BulkActionResult`, which is
//! persisted into the job after each element. A restarted run loads that
//! snapshot and only processes what is not recorded yet.

pub mod monitor;
mod result;

pub use result::{BulkActionResult, ErrorReason, MAX_MESSAGE_CHARS, ReasonDetail, ReasonKind};

use anyhow::Context;
use async_trait::async_trait;
use conductor_core::domain::resource::OperationResponse;
use conductor_core::dto::job::JobEdit;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::job::JobHandle;
use crate::registry::{Action, ActionProvider};

/// Category recorded when an element call returns an error
pub const UNEXPECTED_ERROR: &str = "Unexpected error";

/// Category recorded when an operation answers with an unknown status
pub const UNEXPECTED_STATUS: &str = "Unexpected status";

/// Classification of one element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    /// Handed off as a sub-job; completion is observed by the monitor
    Queued,
    Skipped {
        category: String,
        name: Option<String>,
    },
    Failed {
        category: String,
        name: Option<String>,
        message: String,
    },
}

impl ItemOutcome {
    pub fn skipped(category: impl Into<String>) -> Self {
        ItemOutcome::Skipped {
            category: category.into(),
            name: None,
        }
    }

    pub fn failed(category: impl Into<String>, message: impl Into<String>) -> Self {
        ItemOutcome::Failed {
            category: category.into(),
            name: None,
            message: message.into(),
        }
    }

    /// Attaches the display name of the resource
    pub fn with_name(mut self, resource_name: impl Into<String>) -> Self {
        match &mut self {
            ItemOutcome::Skipped { name, .. } | ItemOutcome::Failed { name, .. } => {
                *name = Some(resource_name.into());
            }
            ItemOutcome::Success | ItemOutcome::Queued => {}
        }
        self
    }

    /// Classifies an operation response by its status
    pub fn from_response(response: &OperationResponse) -> Self {
        if response.is_completed() {
            ItemOutcome::Success
        } else if response.is_accepted() {
            ItemOutcome::Queued
        } else {
            ItemOutcome::failed(
                UNEXPECTED_STATUS,
                format!("status {}: {}", response.status, response.message),
            )
        }
    }

    fn record(self, result: &mut BulkActionResult, id: &str) {
        match self {
            ItemOutcome::Success => result.add_success(id),
            ItemOutcome::Queued => result.add_queued(id),
            ItemOutcome::Skipped { category, name } => result.add_skipped(&category, id, name),
            ItemOutcome::Failed {
                category,
                name,
                message,
            } => result.add_failed(&category, id, name, &message),
        }
    }
}

/// Operation applied to every resource of a bulk job
#[async_trait]
pub trait BulkAction: Send + Sync {
    /// Ids of the resources to process
    async fn get_todo(&self, job: &JobHandle) -> anyhow::Result<Vec<String>>;

    /// Processes one resource
    ///
    /// An `Err` is recorded as a failure under `UNEXPECTED_ERROR`.
    async fn action(&self, job: &JobHandle, id: &str) -> anyhow::Result<ItemOutcome>;
}

/// Drives a `BulkAction` over its to-do set
pub struct BulkRunner;

impl BulkRunner {
    /// Runs the bulk action, resuming from the result persisted in the job
    ///
    /// Element failures never fail the job; an error is only returned when
    /// the to-do set cannot be computed or the result cannot be persisted.
    pub async fn run<A>(job: &mut JobHandle, action: &A) -> anyhow::Result<i32>
    where
        A: BulkAction + ?Sized,
    {
        let mut result = load_result(job);

        let todo = action
            .get_todo(job)
            .await
            .context("Failed to compute the bulk to-do set")?;

        let mut seen = HashSet::new();
        let pending: Vec<String> = todo
            .into_iter()
            .filter(|id| !result.is_recorded(id) && seen.insert(id.clone()))
            .collect();

        result.extend_total(result.recorded_count() + pending.len());

        info!(
            "Bulk job {}: {} pending of {} ({} already recorded)",
            job.id(),
            pending.len(),
            result.total_actions(),
            result.recorded_count()
        );

        if pending.is_empty() {
            persist(job, &result).await?;
            return Ok(0);
        }

        for id in pending {
            let outcome = match action.action(job, &id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Bulk job {}: {} failed: {:#}", job.id(), id, e);
                    ItemOutcome::failed(UNEXPECTED_ERROR, format!("{:#}", e))
                }
            };

            debug!("Bulk job {}: {} -> {:?}", job.id(), id, outcome);
            outcome.record(&mut result, &id);
            persist(job, &result).await?;
        }

        info!(
            "Bulk job {} done: {} succeeded, {} failed, {} skipped, {} in flight",
            job.id(),
            result.success_count(),
            result.failed_count(),
            result.skipped_count(),
            result.in_flight_count()
        );

        Ok(0)
    }
}

/// Result persisted in the job, or a fresh one
pub fn load_result(job: &JobHandle) -> BulkActionResult {
    match job.status_message() {
        Some(message) if !message.trim().is_empty() => BulkActionResult::from_json(message)
            .unwrap_or_else(|e| {
                warn!(
                    "Bulk job {} has an unreadable result, starting over: {}",
                    job.id(),
                    e
                );
                BulkActionResult::default()
            }),
        _ => BulkActionResult::default(),
    }
}

/// Stores the result and its progress in the job
pub async fn persist(job: &mut JobHandle, result: &BulkActionResult) -> anyhow::Result<()> {
    let edit = JobEdit::default()
        .with_status_message(result.to_json()?)
        .with_progress(result.progress());

    job.update(edit)
        .await
        .with_context(|| format!("Failed to persist bulk result of {}", job.id()))
}

/// Adapts a `BulkAction` into a registered action
///
/// `constructor` builds the bulk action from the job, typically from its
/// payload.
pub struct BulkActionProvider<A, F> {
    name: &'static str,
    constructor: F,
    _action: std::marker::PhantomData<fn() -> A>,
}

impl<A, F> BulkActionProvider<A, F>
where
    A: BulkAction + 'static,
    F: Fn(&JobHandle) -> anyhow::Result<A> + Send + Sync,
{
    pub fn new(name: &'static str, constructor: F) -> Self {
        Self {
            name,
            constructor,
            _action: std::marker::PhantomData,
        }
    }
}

impl<A, F> ActionProvider for BulkActionProvider<A, F>
where
    A: BulkAction + 'static,
    F: Fn(&JobHandle) -> anyhow::Result<A> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn build(&self, job: &JobHandle) -> anyhow::Result<Box<dyn Action>> {
        let action = (self.constructor)(job)?;
        Ok(Box::new(BulkHandler { action }))
    }
}

struct BulkHandler<A> {
    action: A,
}

#[async_trait]
impl<A: BulkAction> Action for BulkHandler<A> {
    async fn do_work(&mut self, job: &mut JobHandle) -> anyhow::Result<i32> {
        BulkRunner::run(job, &self.action).await
    }
}
