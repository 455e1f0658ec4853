//! Repository layer
//!
//! Repositories are stateless clients that abstract communication with the
//! orchestration service. They provide focused interfaces without any
//! business logic.
//!
//! All repositories are trait-based to enable testing and mocking.

mod resources;

pub use resources::{HttpResourceRepository, ResourceRepository};
