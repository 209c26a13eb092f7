//! Core domain types
//!
//! This module contains the core domain structures used across Keel services.
//! These types represent the fundamental business entities and are shared between
//! coordinator (for persistence and scheduling) and agent (for execution).

pub mod agent;
pub mod capability;
pub mod definition;
pub mod job;
pub mod log;
pub mod network;
pub mod pipeline;
