//! Scheduler layer for the agent
//!
//! This layer claims jobs from the coordinator and coordinates their
//! execution. It manages the lifecycle of jobs from claiming to the
//! terminal report.

pub mod poller;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use poller::JobPoller;
pub use runner::JobRunner;
