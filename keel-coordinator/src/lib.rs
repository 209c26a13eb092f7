//! Keel coordinator
//!
//! Owns the job queue, the agent registry and the pipeline state machine,
//! and serves them over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
