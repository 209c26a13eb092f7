//! Execution sandboxes
//!
//! A sandbox is an ephemeral environment bound to one job. It is created
//! before the first step, runs each step command with the workspace as the
//! working directory, and is destroyed once when the job ends.
//!
//! Providers:
//! - `podman`: one long-lived container per job, steps via `podman exec`
//! - `process`: host shell in a per-job workspace directory

pub mod podman;
pub mod process;

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_core::domain::capability;
use keel_core::domain::job::ResourceLimits;
use keel_core::dto::job::Assignment;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::config::Config;

/// Receives output lines of a running step
pub type OutputSink<'a> = &'a (dyn Fn(String) + Send + Sync);

/// An agent-side directory mounted into the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub name: String,
    pub host_path: PathBuf,
}

/// Everything a provider needs to build the sandbox of one job
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub job_id: Uuid,

    /// Unique per claim attempt
    pub name: String,

    pub image: String,
    pub workspace: PathBuf,
    pub resources: ResourceLimits,

    /// Volumes the job requires through `volume:<name>` tags
    pub mounts: Vec<Mount>,

    /// Host isolation socket, only for `privileged` jobs
    pub privileged_socket: Option<PathBuf>,

    pub network: Option<String>,

    /// Static `host:ip` entries
    pub host_entries: Vec<String>,

    pub env: Vec<(String, String)>,
}

impl SandboxSpec {
    /// Builds the spec for an assignment.
    ///
    /// Grants the isolation socket and volume mounts only for the tags the
    /// job requires. Fails when one of them is not configured here.
    pub fn for_job(assignment: &Assignment, config: &Config) -> Result<Self> {
        let job = &assignment.job;
        let required = &job.required_capabilities;

        let privileged_socket = if required.iter().any(|tag| tag == capability::PRIVILEGED) {
            let socket = config.privileged_socket.clone().context(
                "job requires the privileged capability but no isolation socket is configured",
            )?;
            Some(socket)
        } else {
            None
        };

        let mounts = required
            .iter()
            .filter_map(|tag| capability::volume_name(tag))
            .map(|name| {
                config
                    .volumes
                    .get(name)
                    .map(|host_path| Mount {
                        name: name.to_string(),
                        host_path: host_path.clone(),
                    })
                    .with_context(|| format!("volume '{}' is not configured on this agent", name))
            })
            .collect::<Result<Vec<_>>>()?;

        let trigger = &assignment.trigger;
        let mut env = vec![
            ("CI".to_string(), "true".to_string()),
            ("KEEL_JOB_ID".to_string(), job.id.to_string()),
            ("KEEL_JOB_NAME".to_string(), job.name.clone()),
            ("KEEL_PIPELINE_ID".to_string(), job.pipeline_id.to_string()),
            ("KEEL_ATTEMPT".to_string(), job.attempt.to_string()),
            ("KEEL_REPOSITORY".to_string(), trigger.repository.clone()),
            ("KEEL_REF".to_string(), trigger.git_ref.clone()),
        ];
        if let Some(sha) = &trigger.commit_sha {
            env.push(("KEEL_COMMIT_SHA".to_string(), sha.clone()));
        }

        Ok(Self {
            job_id: job.id,
            name: format!("keel-{}-{}", job.id, job.attempt),
            image: job
                .image
                .clone()
                .unwrap_or_else(|| config.default_image.clone()),
            workspace: config.workspace_base.join(job.id.to_string()),
            resources: job.resources.clone(),
            mounts,
            privileged_socket,
            network: config.sandbox_network.clone(),
            host_entries: config.host_aliases.host_entries(),
            env,
        })
    }
}

/// Builds sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, spec: &SandboxSpec) -> Result<Box<dyn Sandbox>>;
}

/// A live sandbox
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Runs one shell command in the workspace, streaming its combined
    /// output to `sink`, and returns the exit code
    async fn exec(&self, command: &str, sink: OutputSink<'_>) -> Result<i32>;

    /// Tears the sandbox down. Repeated calls are no-ops.
    async fn destroy(&self) -> Result<()>;
}

/// Runs `command` to completion, forwarding stdout and stderr lines as they arrive
pub(crate) async fn run_streaming(command: Command, sink: OutputSink<'_>) -> Result<i32> {
    let child = spawn_piped(command)?;
    stream_child(child, sink).await
}

/// Spawns with piped output; the child is killed if its handle is dropped
pub(crate) fn spawn_piped(mut command: Command) -> Result<Child> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    command.spawn().context("Failed to spawn step command")
}

pub(crate) async fn stream_child(mut child: Child, sink: OutputSink<'_>) -> Result<i32> {
    let stdout = child.stdout.take().context("step stdout was not captured")?;
    let stderr = child.stderr.take().context("step stderr was not captured")?;

    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;

    // read_until keeps partial bytes in the buffer when the other branch wins
    while stdout_open || stderr_open {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => {
                if read.context("Failed to read step output")? == 0 {
                    stdout_open = false;
                }
                flush_line(&mut stdout_buf, sink);
            },
            read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                if read.context("Failed to read step output")? == 0 {
                    stderr_open = false;
                }
                flush_line(&mut stderr_buf, sink);
            },
        }
    }

    let status = child.wait().await.context("Failed to wait for step command")?;
    // Killed by a signal
    Ok(status.code().unwrap_or(-1))
}

/// Sends a buffered line to `sink`, decoding invalid UTF-8 lossily
fn flush_line(buf: &mut Vec<u8>, sink: OutputSink<'_>) {
    if buf.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(buf);
    sink(line.trim_end_matches(['\n', '\r']).to_string());
    buf.clear();
}

/// Removes a workspace directory, treating a missing one as removed
pub(crate) async fn remove_workspace(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove workspace {}", path.display())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use keel_core::domain::definition::TriggerEvent;
    use keel_core::domain::job::{Job, JobStatus, Step};
    use std::sync::Mutex;

    pub fn job(required: &[&str]) -> Job {
        Job {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            name: "build".to_string(),
            position: 0,
            needs: Vec::new(),
            required: true,
            required_capabilities: required.iter().map(|s| s.to_string()).collect(),
            steps: vec![Step {
                name: "make".to_string(),
                run: "make".to_string(),
            }],
            image: None,
            resources: ResourceLimits::default(),
            timeout_seconds: None,
            status: JobStatus::Claimed,
            agent_id: Some("agent-1".to_string()),
            attempt: 1,
            enqueued_at: Utc::now(),
            claimed_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            cancel_requested_at: None,
            failure: None,
        }
    }

    pub fn assignment(job: Job) -> Assignment {
        Assignment {
            job,
            trigger: TriggerEvent {
                repository: "acme/app".to_string(),
                git_ref: "refs/heads/main".to_string(),
                commit_sha: Some("0123abcd".to_string()),
                clone_url: None,
                event: None,
            },
        }
    }

    #[test]
    fn test_spec_defaults() {
        let config = Config::default();
        let assignment = assignment(job(&["linux"]));
        let spec = SandboxSpec::for_job(&assignment, &config).unwrap();

        assert_eq!(spec.image, config.default_image);
        assert_eq!(spec.workspace, config.workspace_base.join(assignment.job.id.to_string()));
        assert!(spec.privileged_socket.is_none());
        assert!(spec.mounts.is_empty());
        assert!(spec.env.contains(&("KEEL_COMMIT_SHA".to_string(), "0123abcd".to_string())));
    }

    #[test]
    fn test_privileged_socket_only_for_privileged_jobs() {
        let mut config = Config::default();
        config.privileged_socket = Some(PathBuf::from("/run/podman/podman.sock"));

        let plain = SandboxSpec::for_job(&assignment(job(&[])), &config).unwrap();
        assert!(plain.privileged_socket.is_none());

        let privileged = SandboxSpec::for_job(&assignment(job(&["privileged"])), &config).unwrap();
        assert_eq!(privileged.privileged_socket, config.privileged_socket);

        config.privileged_socket = None;
        assert!(SandboxSpec::for_job(&assignment(job(&["privileged"])), &config).is_err());
    }

    #[test]
    fn test_only_required_volumes_are_mounted() {
        let mut config = Config::default();
        config.volumes.insert("cache".into(), PathBuf::from("/var/cache/keel"));
        config.volumes.insert("secrets".into(), PathBuf::from("/etc/keel/secrets"));

        let spec = SandboxSpec::for_job(&assignment(job(&["volume:cache"])), &config).unwrap();
        assert_eq!(
            spec.mounts,
            vec![Mount {
                name: "cache".into(),
                host_path: PathBuf::from("/var/cache/keel"),
            }]
        );

        let err = SandboxSpec::for_job(&assignment(job(&["volume:models"])), &config).unwrap_err();
        assert!(err.to_string().contains("models"));
    }

    #[tokio::test]
    async fn test_run_streaming_collects_both_streams() {
        let lines = Mutex::new(Vec::new());
        let sink = |line: String| lines.lock().unwrap().push(line);

        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err >&2; exit 3");
        let code = run_streaming(command, &sink).await.unwrap();

        assert_eq!(code, 3);
        let mut lines = lines.into_inner().unwrap();
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    async fn test_run_streaming_tolerates_invalid_utf8() {
        let lines = Mutex::new(Vec::new());
        let sink = |line: String| lines.lock().unwrap().push(line);

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("printf 'ok\\n\\377\\376 latin1\\n'; printf 'tail'; exit 0");
        let code = run_streaming(command, &sink).await.unwrap();

        assert_eq!(code, 0);
        let lines = lines.into_inner().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ok");
        assert_eq!(lines[1], "\u{FFFD}\u{FFFD} latin1");
        assert_eq!(lines[2], "tail");
    }
}
