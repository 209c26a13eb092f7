//! Podman sandbox
//!
//! Handles the container lifecycle of a job:
//! - Checking podman availability
//! - Starting one long-lived container with the workspace mounted
//! - Executing step commands with `podman exec`
//! - Removing the container and workspace when the job ends

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{OutputSink, Sandbox, SandboxProvider, SandboxSpec, remove_workspace, run_streaming};

/// Where the host isolation socket appears inside privileged sandboxes
const SOCKET_PATH: &str = "/run/podman/podman.sock";

/// Checks if podman is installed and returns its version line
pub fn check_podman_available() -> Result<String> {
    let output = std::process::Command::new("podman")
        .arg("--version")
        .output()
        .context("Failed to execute 'podman --version'. Is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Arguments of the `podman run` that starts the job container
pub fn run_args(spec: &SandboxSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        spec.name.clone(),
        // Override any image entrypoint
        "--entrypoint".into(),
        "/bin/sh".into(),
        "-v".into(),
        format!("{}:/workspace", spec.workspace.display()),
        "-w".into(),
        "/workspace".into(),
    ];

    if let Some(network) = &spec.network {
        args.push("--network".into());
        args.push(network.clone());
    }

    for entry in &spec.host_entries {
        args.push("--add-host".into());
        args.push(entry.clone());
    }

    if let Some(memory) = &spec.resources.memory {
        args.push("--memory".into());
        args.push(memory.clone());
    }
    if let Some(cpus) = &spec.resources.cpus {
        args.push("--cpus".into());
        args.push(cpus.clone());
    }
    if let Some(pids) = spec.resources.pids {
        args.push("--pids-limit".into());
        args.push(pids.to_string());
    }

    if let Some(socket) = &spec.privileged_socket {
        args.push("-v".into());
        args.push(format!("{}:{}", socket.display(), SOCKET_PATH));
        args.push("--security-opt".into());
        args.push("label=disable".into());
        args.push("-e".into());
        args.push(format!("CONTAINER_HOST=unix://{}", SOCKET_PATH));
    }

    for mount in &spec.mounts {
        args.push("-v".into());
        args.push(format!("{}:/volumes/{}", mount.host_path.display(), mount.name));
    }

    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{}={}", key, value));
    }

    args.push(spec.image.clone());
    args.push("-c".into());
    args.push("sleep infinity".into());
    args
}

/// Runs each job in its own podman container
#[derive(Debug, Default)]
pub struct PodmanProvider;

#[async_trait]
impl SandboxProvider for PodmanProvider {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>> {
        tokio::fs::create_dir_all(&spec.workspace)
            .await
            .context("Failed to create workspace directory")?;

        info!(job_id = %spec.job_id, "Creating container {} from {}", spec.name, spec.image);

        // A container left behind by a crashed agent would block the name
        let _ = Command::new("podman")
            .args(["rm", "-f", spec.name.as_str()])
            .output()
            .await;

        let output = Command::new("podman")
            .args(run_args(spec))
            .output()
            .await
            .context("Failed to execute podman run command")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("podman run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let _ = remove_workspace(&spec.workspace).await;
            anyhow::bail!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                spec.image,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        info!(
            job_id = %spec.job_id,
            "Container {} started with ID: {}",
            spec.name,
            stdout.trim()
        );

        Ok(Box::new(PodmanSandbox {
            spec: spec.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

pub struct PodmanSandbox {
    spec: SandboxSpec,
    destroyed: AtomicBool,
}

#[async_trait]
impl Sandbox for PodmanSandbox {
    fn id(&self) -> &str {
        &self.spec.name
    }

    async fn exec(&self, command: &str, sink: OutputSink<'_>) -> Result<i32> {
        debug!("Executing in container {}: {}", self.spec.name, command);

        let mut podman = Command::new("podman");
        podman
            .arg("exec")
            .arg("-w")
            .arg("/workspace")
            .arg(&self.spec.name)
            .arg("/bin/sh")
            .arg("-c")
            .arg(command);

        run_streaming(podman, sink).await
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(job_id = %self.spec.job_id, "Removing container {}", self.spec.name);

        let output = Command::new("podman")
            .args(["rm", "-f", "-t", "0", self.spec.name.as_str()])
            .output()
            .await
            .context("Failed to execute podman rm")?;

        if !output.status.success() {
            warn!(
                "Failed to remove container {}: {}",
                self.spec.name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        remove_workspace(&self.spec.workspace).await
    }
}

impl Drop for PodmanSandbox {
    fn drop(&mut self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        warn!("Container {} dropped without destroy, removing", self.spec.name);
        if let Err(e) = std::process::Command::new("podman")
            .args(["rm", "-f", "-t", "0", self.spec.name.as_str()])
            .output()
        {
            warn!("Failed to remove container {} on drop: {}", self.spec.name, e);
        }
    }
}
