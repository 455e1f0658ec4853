//! Conductor Core
//!
//! Core types shared by the Conductor job engine crates.
//!
//! This crate contains:
//! - Domain types: job records and orchestration resources
//! - DTOs: requests exchanged with the orchestration and coordination services

pub mod domain;
pub mod dto;
