//! Keel Agent
//!
//! A worker that claims jobs from the coordinator and runs them in
//! ephemeral sandboxes.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: HTTP link to the coordinator (register, heartbeat, claim, report)
//! - Services: Capability discovery, log buffering, network preflight
//! - Sandbox: podman containers or host processes, one per job
//! - Scheduler: Claim loop, heartbeat loop and the per-job runner
//!
//! In-flight jobs are abandoned on shutdown; the coordinator requeues them
//! once this agent's heartbeat lapses.

mod config;
mod repository;
mod sandbox;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use keel_core::domain::agent::AgentAddress;
use keel_core::dto::agent::RegisterAgent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, SandboxKind};
use crate::repository::{Backoff, CoordinatorLink, HttpCoordinatorLink, with_retry};
use crate::sandbox::SandboxProvider;
use crate::sandbox::podman::PodmanProvider;
use crate::sandbox::process::ProcessProvider;
use crate::scheduler::{JobPoller, JobRunner};
use crate::service::{CapabilitiesService, StandardCapabilitiesService, network};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keel_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Keel Agent");

    let config = Config::from_env().context("Invalid agent configuration")?;
    config.validate().context("Invalid agent configuration")?;
    info!(
        "Loaded configuration: agent_id={}, coordinator_url={}, sandbox={:?}",
        config.agent_id, config.coordinator_url, config.sandbox
    );

    let capabilities = StandardCapabilitiesService::new(config.clone()).discover();
    info!("Advertising {} capabilities", capabilities.len());
    for cap in &capabilities {
        info!("  - {}", cap);
    }

    let link: Arc<dyn CoordinatorLink> =
        Arc::new(HttpCoordinatorLink::new(config.coordinator_url.clone()));

    let request = RegisterAgent {
        agent_id: config.agent_id.clone(),
        capabilities,
        address: AgentAddress {
            host: config.advertised_host.clone(),
            network: config.sandbox_network.clone(),
        },
        max_concurrent_jobs: config.max_concurrent_jobs,
    };

    // The coordinator may not be ready yet when the agent starts
    info!("Registering with coordinator");
    let registration = with_retry("register with coordinator", Backoff::default(), || {
        link.register(&request)
    })
    .await
    .context("Failed to register with coordinator")?;
    info!(
        "Registered as {} (heartbeat every {}s)",
        registration.agent_id, registration.heartbeat_interval_seconds
    );

    run_preflight(link.as_ref(), &config).await;

    let provider: Arc<dyn SandboxProvider> = match config.sandbox {
        SandboxKind::Podman => Arc::new(PodmanProvider),
        SandboxKind::Process => Arc::new(ProcessProvider),
    };

    let config = Arc::new(config);
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&config),
        Arc::clone(&link),
        provider,
    ));
    let poller = JobPoller::new(config, link, runner, request);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        signal.cancel();
    });

    poller.run(registration, shutdown).await?;
    info!("Agent stopped");
    Ok(())
}

/// Logs every advertised address a sandbox could not reach
async fn run_preflight(link: &dyn CoordinatorLink, config: &Config) {
    let info = match link.network_info().await {
        Ok(info) => info,
        Err(e) => {
            warn!("Skipping network preflight, network info unavailable: {}", e);
            return;
        }
    };

    let issues = network::preflight(&info, &config.host_aliases).await;
    if issues.is_empty() {
        info!("Network preflight passed");
    }
    for issue in issues {
        error!("Network preflight: {}", issue);
    }
}
