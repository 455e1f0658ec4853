//! Data Transfer Objects
//!
//! Requests and responses exchanged with the orchestration service and the
//! coordination service.

pub mod coordination;
pub mod job;
