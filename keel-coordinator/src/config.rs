//! Coordinator configuration
//!
//! Loaded from a JSON or YAML file named by `KEEL_COORDINATOR_CONFIG`, with
//! environment overrides for the database URL and the bind address. Every
//! field has a default, so the coordinator also starts without a file.
//!
//! The configuration is versioned. `POST /api/admin/reload` re-reads the file
//! and swaps the reloadable fields; the bind address and the database URL are
//! only read at startup.

use keel_core::domain::network;
use keel_core::dto::admin::ReloadResponse;
use keel_core::dto::network::NetworkInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

pub const CONFIG_ENV: &str = "KEEL_COORDINATOR_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no configuration file to reload; set KEEL_COORDINATOR_CONFIG")]
    NoFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Configuration version, bumped on every effective reload
    pub version: u64,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Postgres URL; the in-memory store is used when absent
    pub database_url: Option<String>,

    /// Interval agents are told to heartbeat at
    pub heartbeat_interval_seconds: u64,

    /// Silence after which an agent is Unreachable and its jobs are requeued
    pub heartbeat_timeout_seconds: u64,

    /// How often the staleness sweep runs
    pub sweep_interval_seconds: u64,

    /// Time an agent has to confirm a cancellation before it is forced
    pub cancel_grace_seconds: u64,

    /// A Running job without progress reports for this long is failed
    pub job_progress_timeout_seconds: u64,

    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// URL agents use to reach this coordinator
    pub advertised_url: Option<String>,

    /// Base of the clone URLs built for triggers that carry none
    pub clone_base_url: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            heartbeat_interval_seconds: 10,
            heartbeat_timeout_seconds: 30,
            sweep_interval_seconds: 5,
            cancel_grace_seconds: 30,
            job_progress_timeout_seconds: 300,
            network: NetworkConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load a configuration file (JSON or YAML)
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let parsed = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
            _ => serde_json::from_str(&content).map_err(|e| e.to_string()),
        };

        parsed.map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Ok(addr) = std::env::var("COORDINATOR_BIND_ADDR") {
            self.bind_addr = addr;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.is_empty() {
            return Err(ConfigError::Invalid("bind_addr cannot be empty".to_string()));
        }
        for (name, value) in [
            ("heartbeat_interval_seconds", self.heartbeat_interval_seconds),
            ("heartbeat_timeout_seconds", self.heartbeat_timeout_seconds),
            ("sweep_interval_seconds", self.sweep_interval_seconds),
            ("cancel_grace_seconds", self.cancel_grace_seconds),
            ("job_progress_timeout_seconds", self.job_progress_timeout_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        if self.heartbeat_timeout_seconds <= self.heartbeat_interval_seconds {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_seconds must be greater than heartbeat_interval_seconds"
                    .to_string(),
            ));
        }
        for (name, value) in [
            ("network.advertised_url", &self.network.advertised_url),
            ("network.clone_base_url", &self.network.clone_base_url),
        ] {
            if let Some(url) = value {
                network::host_and_port(url)
                    .map_err(|e| ConfigError::Invalid(format!("{}: {}", name, e)))?;
            }
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            advertised_url: self.network.advertised_url.clone(),
            clone_base_url: self.network.clone_base_url.clone(),
        }
    }

    /// Names of the reloadable settings that differ between `self` and `other`
    fn reloadable_changes(&self, other: &Self) -> Vec<String> {
        let mut changed = Vec::new();
        let mut check = |name: &str, differs: bool| {
            if differs {
                changed.push(name.to_string());
            }
        };
        check(
            "heartbeat_interval_seconds",
            self.heartbeat_interval_seconds != other.heartbeat_interval_seconds,
        );
        check(
            "heartbeat_timeout_seconds",
            self.heartbeat_timeout_seconds != other.heartbeat_timeout_seconds,
        );
        check(
            "sweep_interval_seconds",
            self.sweep_interval_seconds != other.sweep_interval_seconds,
        );
        check(
            "cancel_grace_seconds",
            self.cancel_grace_seconds != other.cancel_grace_seconds,
        );
        check(
            "job_progress_timeout_seconds",
            self.job_progress_timeout_seconds != other.job_progress_timeout_seconds,
        );
        check(
            "network.advertised_url",
            self.network.advertised_url != other.network.advertised_url,
        );
        check(
            "network.clone_base_url",
            self.network.clone_base_url != other.network.clone_base_url,
        );
        changed
    }
}

/// Active configuration, shared by the HTTP handlers and the sweep
pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<CoordinatorConfig>,
}

impl ConfigHandle {
    pub fn new(config: CoordinatorConfig, path: Option<PathBuf>) -> Self {
        Self {
            path,
            current: RwLock::new(config),
        }
    }

    /// Loads the file named by `KEEL_COORDINATOR_CONFIG`, if set, then the
    /// environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match &path {
            Some(path) => CoordinatorConfig::from_file(path)?,
            None => CoordinatorConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(Self::new(config, path))
    }

    pub async fn snapshot(&self) -> CoordinatorConfig {
        self.current.read().await.clone()
    }

    /// Re-reads the config file and swaps the reloadable fields.
    ///
    /// An invalid file leaves the active configuration untouched.
    pub async fn reload(&self) -> Result<ReloadResponse, ConfigError> {
        let path = self.path.as_ref().ok_or(ConfigError::NoFile)?;
        let mut next = CoordinatorConfig::from_file(path)?;
        next.apply_env();
        next.validate()?;

        let mut current = self.current.write().await;
        let previous_version = current.version;
        let changed = current.reloadable_changes(&next);

        if next.bind_addr != current.bind_addr || next.database_url != current.database_url {
            tracing::warn!("bind_addr and database_url changes require a restart; ignored");
        }

        if changed.is_empty() {
            return Ok(ReloadResponse {
                version: previous_version,
                previous_version,
                changed,
            });
        }

        let version = next.version.max(previous_version + 1);
        *current = CoordinatorConfig {
            version,
            bind_addr: current.bind_addr.clone(),
            database_url: current.database_url.clone(),
            ..next
        };

        tracing::info!(
            "Configuration reloaded: version {} -> {} ({})",
            previous_version,
            version,
            changed.join(", ")
        );

        Ok(ReloadResponse {
            version,
            previous_version,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, 1);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = CoordinatorConfig {
            sweep_interval_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_below_interval() {
        let config = CoordinatorConfig {
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_network_url() {
        let mut config = CoordinatorConfig::default();
        config.network.clone_base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "keel.yaml",
            "version: 3\nheartbeat_timeout_seconds: 45\nnetwork:\n  clone_base_url: http://git.local:3000\n",
        );
        let config = CoordinatorConfig::from_file(&path).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.heartbeat_timeout_seconds, 45);
        assert_eq!(config.heartbeat_interval_seconds, 10);
        assert_eq!(
            config.network.clone_base_url.as_deref(),
            Some("http://git.local:3000")
        );
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "keel.json", r#"{"cancel_grace_seconds": 5}"#);
        let config = CoordinatorConfig::from_file(&path).unwrap();
        assert_eq!(config.cancel_grace_seconds, 5);
    }

    #[tokio::test]
    async fn test_reload_bumps_version_and_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "keel.json", r#"{"cancel_grace_seconds": 5}"#);
        let initial = CoordinatorConfig::from_file(&path).unwrap();
        let handle = ConfigHandle::new(initial, Some(path.clone()));

        write_config(
            &dir,
            "keel.json",
            r#"{"cancel_grace_seconds": 10, "bind_addr": "127.0.0.1:9999"}"#,
        );
        let response = handle.reload().await.unwrap();
        assert_eq!(response.previous_version, 1);
        assert_eq!(response.version, 2);
        assert_eq!(response.changed, vec!["cancel_grace_seconds".to_string()]);

        let active = handle.snapshot().await;
        assert_eq!(active.cancel_grace_seconds, 10);
        assert_eq!(active.bind_addr, "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_reload_without_changes_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "keel.json", "{}");
        let handle = ConfigHandle::new(CoordinatorConfig::default(), Some(path));

        let response = handle.reload().await.unwrap();
        assert_eq!(response.version, 1);
        assert!(response.changed.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_active_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "keel.json", r#"{"sweep_interval_seconds": 0}"#);
        let handle = ConfigHandle::new(CoordinatorConfig::default(), Some(path));

        assert!(handle.reload().await.is_err());
        assert_eq!(handle.snapshot().await, CoordinatorConfig::default());
    }

    #[tokio::test]
    async fn test_reload_without_file() {
        let handle = ConfigHandle::new(CoordinatorConfig::default(), None);
        assert!(matches!(handle.reload().await, Err(ConfigError::NoFile)));
    }
}
