//! Capabilities service
//!
//! Computes the capability tags this agent advertises. Operator-configured
//! tags are combined with tags derived from the agent's own setup: a
//! configured isolation socket grants `privileged`, each configured volume
//! grants `volume:<name>`, and a working container runtime grants `container`.

use keel_core::domain::capability;
use tracing::{info, warn};

use crate::config::{Config, SandboxKind};

/// Service trait for capability discovery
pub trait CapabilitiesService: Send + Sync {
    /// Discovers all capabilities available on this agent
    fn discover(&self) -> Vec<String>;
}

/// Standard implementation of CapabilitiesService
pub struct StandardCapabilitiesService {
    config: Config,
}

impl StandardCapabilitiesService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl CapabilitiesService for StandardCapabilitiesService {
    fn discover(&self) -> Vec<String> {
        info!("Discovering agent capabilities");

        let container_available = match self.config.sandbox {
            SandboxKind::Podman => match crate::sandbox::podman::check_podman_available() {
                Ok(version) => {
                    info!("Podman is available: {}", version);
                    true
                }
                Err(e) => {
                    warn!("Podman is not available: {:#}", e);
                    false
                }
            },
            SandboxKind::Process => false,
        };

        capability_set(&self.config, container_available)
    }
}

/// Tags advertised for `config`
pub fn capability_set(config: &Config, container_available: bool) -> Vec<String> {
    let mut tags = config.capabilities.clone();

    if config.privileged_socket.is_some() && container_available {
        tags.push(capability::PRIVILEGED.to_string());
    }

    tags.extend(config.volumes.keys().map(|name| capability::volume_tag(name)));

    if container_available {
        tags.push(capability::CONTAINER.to_string());
    }

    capability::normalize(tags)
}
