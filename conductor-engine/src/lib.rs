//! Conductor engine
//!
//! Distributed job scheduling and execution: executors drain a locking
//! queue and run registered action handlers, distributors elect one leader
//! per periodic job producer, and the bulk engine fans an operation out over
//! large resource sets with resumable, categorized accounting.

pub mod actions;
pub mod bulk;
pub mod config;
pub mod coordination;
pub mod distribution;
pub mod distributions;
pub mod distributor;
pub mod error;
pub mod executor;
pub mod job;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod shutdown;
pub mod version;

pub use config::Config;
pub use error::{EngineError, Result};
pub use executor::{Disposition, Executor, Outcome};
pub use job::JobHandle;
pub use registry::{Action, ActionProvider, ActionRegistry};

/// Registry holding the built-in actions
pub fn default_registry() -> ActionRegistry {
    actions::register(ActionRegistry::builder()).build()
}
