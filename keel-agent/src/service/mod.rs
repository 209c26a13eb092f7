//! Service layer
//!
//! Services contain business logic for the agent: capability discovery,
//! log buffering and the network preflight.

mod capabilities;
mod log_buffer;
pub mod network;

pub use capabilities::{CapabilitiesService, StandardCapabilitiesService};
pub use log_buffer::{InMemoryLogBuffer, LogBufferService};
