//! Process sandbox
//!
//! Runs steps with the host shell in a per-job workspace directory, for
//! hosts without a container runtime. Volumes are passed as
//! `KEEL_VOLUME_<NAME>` environment variables instead of mounts. Resource
//! limits and network settings are not applied.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    OutputSink, Sandbox, SandboxProvider, SandboxSpec, remove_workspace, spawn_piped, stream_child,
};

#[derive(Debug, Default)]
pub struct ProcessProvider;

#[async_trait]
impl SandboxProvider for ProcessProvider {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>> {
        if spec.privileged_socket.is_some() {
            anyhow::bail!("the process sandbox cannot run privileged jobs");
        }

        tokio::fs::create_dir_all(&spec.workspace)
            .await
            .with_context(|| format!("Failed to create workspace {}", spec.workspace.display()))?;

        info!(job_id = %spec.job_id, "Workspace {} ready", spec.workspace.display());

        let mut env = spec.env.clone();
        env.push((
            "KEEL_WORKSPACE".to_string(),
            spec.workspace.display().to_string(),
        ));
        for mount in &spec.mounts {
            env.push((volume_var(&mount.name), mount.host_path.display().to_string()));
        }

        Ok(Box::new(ProcessSandbox {
            spec: spec.clone(),
            env,
            current: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }))
    }
}

/// `cache-dir` becomes `KEEL_VOLUME_CACHE_DIR`
fn volume_var(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("KEEL_VOLUME_{}", suffix)
}

pub struct ProcessSandbox {
    spec: SandboxSpec,
    env: Vec<(String, String)>,
    /// Process group of the running step
    current: Mutex<Option<u32>>,
    destroyed: AtomicBool,
}

impl ProcessSandbox {
    fn set_current(&self, pid: Option<u32>) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }

    /// Kills whatever the interrupted step left running
    async fn kill_current(&self) {
        let pid = self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(pid) = pid else { return };

        debug!("Killing process group {}", pid);
        let result = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", pid))
            .output()
            .await;
        if let Err(e) = result {
            warn!("Failed to kill process group {}: {}", pid, e);
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn id(&self) -> &str {
        &self.spec.name
    }

    async fn exec(&self, command: &str, sink: OutputSink<'_>) -> Result<i32> {
        debug!("Executing in {}: {}", self.spec.workspace.display(), command);

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(command)
            .current_dir(&self.spec.workspace)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        #[cfg(unix)]
        shell.process_group(0);

        let child = spawn_piped(shell)?;
        // The shell leads its own group; an interrupted step is killed through it
        self.set_current(child.id());
        let result = stream_child(child, sink).await;
        self.set_current(None);
        result
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.kill_current().await;
        info!(job_id = %self.spec.job_id, "Removing workspace {}", self.spec.workspace.display());
        remove_workspace(&self.spec.workspace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sandbox::tests::{assignment, job};
    use std::path::PathBuf;

    fn config(base: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.workspace_base = base.to_path_buf();
        config
    }

    #[test]
    fn test_volume_var() {
        assert_eq!(volume_var("cache-dir"), "KEEL_VOLUME_CACHE_DIR");
    }

    #[tokio::test]
    async fn test_exec_runs_in_workspace() {
        let base = tempfile::tempdir().unwrap();
        let spec = SandboxSpec::for_job(&assignment(job(&[])), &config(base.path())).unwrap();
        let sandbox = ProcessProvider.create(&spec).await.unwrap();

        let lines = Mutex::new(Vec::new());
        let sink = |line: String| lines.lock().unwrap().push(line);

        let code = sandbox.exec("echo hello > out.txt && cat out.txt", &sink).await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(lines.lock().unwrap().as_slice(), ["hello"]);
        assert!(spec.workspace.join("out.txt").exists());

        let code = sandbox.exec("exit 4", &sink).await.unwrap();
        assert_eq!(code, 4);

        sandbox.destroy().await.unwrap();
        assert!(!spec.workspace.exists());
        // Idempotent
        sandbox.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_volumes_as_env() {
        let base = tempfile::tempdir().unwrap();
        let mut config = config(base.path());
        config.volumes.insert("cache".into(), PathBuf::from("/var/cache/keel"));
        let spec = SandboxSpec::for_job(&assignment(job(&["volume:cache"])), &config).unwrap();
        let sandbox = ProcessProvider.create(&spec).await.unwrap();

        let lines = Mutex::new(Vec::new());
        let sink = |line: String| lines.lock().unwrap().push(line);
        sandbox.exec("echo $KEEL_VOLUME_CACHE", &sink).await.unwrap();

        assert_eq!(lines.lock().unwrap().as_slice(), ["/var/cache/keel"]);
        sandbox.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_refuses_privileged_jobs() {
        let base = tempfile::tempdir().unwrap();
        let mut config = config(base.path());
        config.privileged_socket = Some(PathBuf::from("/run/podman/podman.sock"));
        let spec = SandboxSpec::for_job(&assignment(job(&["privileged"])), &config).unwrap();

        assert!(ProcessProvider.create(&spec).await.is_err());
    }
}
