//! Repository layer
//!
//! Repositories are stateless HTTP clients that abstract communication
//! with the coordinator. They provide simple, focused interfaces without
//! any business logic.
//!
//! The link is trait-based so the scheduler can run against a fake coordinator.

mod coordinator;

pub use coordinator::{Backoff, CoordinatorLink, HttpCoordinatorLink, with_retry};
