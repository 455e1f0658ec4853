//! Coordination primitives consumed by the engine
//!
//! The locking queue feeds the executors, leader election gates the
//! distributions. Both are provided by an external coordination service;
//! the engine only depends on the traits defined here.

mod election;
mod queue;

pub use election::{Election, HttpElection, Leadership, lead};
pub use queue::{CoordinationQueue, HttpCoordinationQueue, QueueItem};
