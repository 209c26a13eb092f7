//! Data Transfer Objects for inter-service communication
//!
//! This module contains DTOs used for communication between Keel services
//! (coordinator, agents, CLI). DTOs are lightweight representations of
//! domain entities optimized for network transfer.

pub mod admin;
pub mod agent;
pub mod job;
pub mod network;
pub mod pipeline;
