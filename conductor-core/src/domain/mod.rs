//! Core domain types
//!
//! This module contains the structures shared between the orchestration
//! service client and the execution engine. Persistence lives in the
//! orchestration service, execution logic in the engine.

pub mod job;
pub mod resource;
