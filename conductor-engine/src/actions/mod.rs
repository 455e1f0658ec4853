//! Built-in actions
//!
//! Generic maintenance actions shipped with the engine. Business actions are
//! registered next to these by the binaries embedding the engine.

mod bulk_delete;
mod cleanup_jobs;
mod monitor_bulk_action;

pub use bulk_delete::{BULK_DELETE, BulkDelete, BulkDeletePayload};
pub use cleanup_jobs::{CLEANUP_JOBS, CleanupJobs};
pub use monitor_bulk_action::{MONITOR_BULK_ACTION, MonitorBulkAction};

use crate::bulk::BulkActionProvider;
use crate::registry::{ActionRegistryBuilder, FnProvider};

/// Bulk actions whose sub-jobs are followed by the bulk action monitor
pub const BULK_ACTIONS: &[&str] = &[BULK_DELETE];

/// Registers the built-in actions
pub fn register(builder: ActionRegistryBuilder) -> ActionRegistryBuilder {
    builder
        .register(BulkActionProvider::new(BULK_DELETE, BulkDelete::from_job))
        .register(FnProvider::new(CLEANUP_JOBS, CleanupJobs::build))
        .register(FnProvider::new(MONITOR_BULK_ACTION, MonitorBulkAction::build))
}
