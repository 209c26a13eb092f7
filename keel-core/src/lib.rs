//! Keel Core
//!
//! Core types and abstractions for the Keel job scheduler.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Job, Agent, etc.)
//! - DTOs: Data transfer objects for coordinator/agent communication
//! - State rules: job transitions and pipeline status aggregation, shared by
//!   the coordinator (which enforces them) and the agent (which follows them)

pub mod domain;
pub mod dto;
