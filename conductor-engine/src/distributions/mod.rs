//! Built-in distributions

mod bulk_action_monitor;
mod jobs_cleanup;

pub use bulk_action_monitor::{BULK_ACTION_MONITOR, BulkActionMonitor};
pub use jobs_cleanup::{JOBS_CLEANUP, JobsCleanup};

use std::sync::Arc;

use crate::distribution::Distribution;
use crate::repository::ResourceRepository;

/// The built-in distributions
pub fn all(repository: Arc<dyn ResourceRepository>) -> Vec<Arc<dyn Distribution>> {
    vec![
        Arc::new(JobsCleanup),
        Arc::new(BulkActionMonitor::new(repository, crate::actions::BULK_ACTIONS)),
    ]
}
