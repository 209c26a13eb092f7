//! Agent configuration
//!
//! Defines all configurable parameters for the agent including polling
//! intervals, sandbox settings, and coordinator connection settings.

use keel_core::domain::capability;
use keel_core::domain::network::HostAliases;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which sandbox implementation runs jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    /// One podman container per job
    Podman,
    /// Host shell in a per-job workspace directory
    Process,
}

impl FromStr for SandboxKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "podman" => Ok(SandboxKind::Podman),
            "process" => Ok(SandboxKind::Process),
            other => anyhow::bail!("unknown sandbox provider '{}' (expected podman or process)", other),
        }
    }
}

/// Agent configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identity of this agent
    pub agent_id: String,

    /// Coordinator base URL (e.g., "http://localhost:8080")
    pub coordinator_url: String,

    /// Capability tags configured by the operator
    pub capabilities: Vec<String>,

    /// Jobs run at the same time
    pub max_concurrent_jobs: u32,

    /// How often to ask the coordinator for work
    pub poll_interval: Duration,

    /// How often a running job reports progress and buffered logs
    pub progress_interval: Duration,

    /// Timeout for jobs that do not set their own
    pub job_timeout: Duration,

    /// Parent directory of the per-job workspaces
    pub workspace_base: PathBuf,

    /// Image for jobs that do not name one
    pub default_image: String,

    pub sandbox: SandboxKind,

    /// Network the sandboxes join
    pub sandbox_network: Option<String>,

    /// Host aliases injected into sandboxes and applied to clone URLs
    pub host_aliases: HostAliases,

    /// Named host paths mountable by jobs tagged `volume:<name>`
    pub volumes: BTreeMap<String, PathBuf>,

    /// Host isolation socket shared with `privileged` jobs
    pub privileged_socket: Option<PathBuf>,

    /// Address other components use to reach this agent
    pub advertised_host: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(agent_id: String, coordinator_url: String) -> Self {
        Self {
            agent_id,
            coordinator_url,
            capabilities: Vec::new(),
            max_concurrent_jobs: 1,
            poll_interval: Duration::from_secs(5),
            progress_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(3600),
            workspace_base: std::env::temp_dir().join("keel"),
            default_image: "docker.io/library/alpine:latest".to_string(),
            sandbox: SandboxKind::Podman,
            sandbox_network: None,
            host_aliases: HostAliases::default(),
            volumes: BTreeMap::new(),
            privileged_socket: None,
            advertised_host: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - AGENT_ID (default: random UUID)
    /// - COORDINATOR_URL (default: http://localhost:8080)
    /// - AGENT_CAPABILITIES (comma separated tags)
    /// - MAX_CONCURRENT_JOBS (default: 1)
    /// - POLL_INTERVAL, PROGRESS_INTERVAL, JOB_TIMEOUT (seconds)
    /// - WORKSPACE_BASE, DEFAULT_IMAGE
    /// - SANDBOX (podman or process), SANDBOX_NETWORK
    /// - HOST_ALIASES (`host=address,...`)
    /// - AGENT_VOLUMES (`name=/host/path,...`)
    /// - PRIVILEGED_SOCKET, AGENT_HOST
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let agent_id = env("AGENT_ID").unwrap_or(defaults.agent_id);
        let coordinator_url = env("COORDINATOR_URL").unwrap_or(defaults.coordinator_url);

        let capabilities = env("AGENT_CAPABILITIES")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let max_concurrent_jobs = parse_env("MAX_CONCURRENT_JOBS")?.unwrap_or(1);

        let poll_interval = parse_env("POLL_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let progress_interval = parse_env("PROGRESS_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.progress_interval);

        let job_timeout = parse_env("JOB_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        let sandbox = match env("SANDBOX") {
            Some(kind) => kind.parse()?,
            None => defaults.sandbox,
        };

        let host_aliases = match env("HOST_ALIASES") {
            Some(raw) => HostAliases::parse(&raw)?,
            None => HostAliases::default(),
        };

        let volumes = match env("AGENT_VOLUMES") {
            Some(raw) => parse_volumes(&raw)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            agent_id,
            coordinator_url,
            capabilities,
            max_concurrent_jobs,
            poll_interval,
            progress_interval,
            job_timeout,
            workspace_base: env("WORKSPACE_BASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_base),
            default_image: env("DEFAULT_IMAGE").unwrap_or(defaults.default_image),
            sandbox,
            sandbox_network: env("SANDBOX_NETWORK"),
            host_aliases,
            volumes,
            privileged_socket: env("PRIVILEGED_SOCKET").map(PathBuf::from),
            advertised_host: env("AGENT_HOST"),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.trim().is_empty() {
            anyhow::bail!("agent_id cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be greater than 0");
        }

        if self.poll_interval.is_zero() || self.progress_interval.is_zero() {
            anyhow::bail!("poll_interval and progress_interval must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if let Some(tag) = self
            .capabilities
            .iter()
            .find(|tag| !capability::is_valid_tag(tag))
        {
            anyhow::bail!("invalid capability tag '{}'", tag);
        }

        if let Some(name) = self
            .volumes
            .keys()
            .find(|name| !capability::is_valid_tag(&capability::volume_tag(name)))
        {
            anyhow::bail!("invalid volume name '{}'", name);
        }

        if self.sandbox == SandboxKind::Process && self.privileged_socket.is_some() {
            anyhow::bail!("the process sandbox cannot run privileged jobs; unset PRIVILEGED_SOCKET");
        }

        Ok(())
    }

    /// Timeout for one job: its own when it sets one, capped at `job_timeout`
    pub fn timeout_for(&self, job_timeout_seconds: Option<u64>) -> Duration {
        job_timeout_seconds
            .map(Duration::from_secs)
            .map_or(self.job_timeout, |t| t.min(self.job_timeout))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8080".to_string(),
        )
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match env(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `name=/host/path,...`
fn parse_volumes(raw: &str) -> anyhow::Result<BTreeMap<String, PathBuf>> {
    let mut volumes = BTreeMap::new();
    for pair in split_list(raw) {
        let Some((name, path)) = pair.split_once('=') else {
            anyhow::bail!("invalid volume '{}', expected name=/host/path", pair);
        };
        volumes.insert(name.trim().to_string(), PathBuf::from(path.trim()));
    }
    Ok(volumes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.sandbox, SandboxKind::Podman);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.agent_id = String::new();
        assert!(config.validate().is_err());
        config.agent_id = "agent-1".to_string();

        config.coordinator_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
        config.coordinator_url = "http://localhost:8080".to_string();

        config.capabilities = vec!["Has Spaces".to_string()];
        assert!(config.validate().is_err());
        config.capabilities = vec!["linux".to_string()];

        config.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
        config.max_concurrent_jobs = 2;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_process_sandbox_rejects_privileged_socket() {
        let mut config = Config::default();
        config.sandbox = SandboxKind::Process;
        config.privileged_socket = Some(PathBuf::from("/run/podman/podman.sock"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_volumes() {
        let volumes = parse_volumes("cache=/var/cache/keel, secrets = /etc/keel/secrets").unwrap();
        assert_eq!(volumes.get("cache"), Some(&PathBuf::from("/var/cache/keel")));
        assert_eq!(volumes.get("secrets"), Some(&PathBuf::from("/etc/keel/secrets")));
        assert!(parse_volumes("broken").is_err());
    }

    #[test]
    fn test_sandbox_kind() {
        assert_eq!("Process".parse::<SandboxKind>().unwrap(), SandboxKind::Process);
        assert!("docker".parse::<SandboxKind>().is_err());
    }

    #[test]
    fn test_timeout_for() {
        let config = Config::default();
        assert_eq!(config.timeout_for(Some(30)), Duration::from_secs(30));
        assert_eq!(config.timeout_for(None), config.job_timeout);
    }

    #[test]
    fn test_job_cannot_exceed_agent_timeout() {
        let config = Config::default();
        assert_eq!(config.timeout_for(Some(u64::MAX)), config.job_timeout);
        assert_eq!(
            config.timeout_for(Some(config.job_timeout.as_secs() + 1)),
            config.job_timeout
        );
    }
}
