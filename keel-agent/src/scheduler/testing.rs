//! In-process fakes of the coordinator and the sandbox provider

use async_trait::async_trait;
use keel_client::ClientError;
use keel_core::domain::job::{JobStatus, Step};
use keel_core::domain::log::LogEntry;
use keel_core::dto::agent::{HeartbeatResponse, RegisterAgent, Registration};
use keel_core::dto::job::{Assignment, StatusAck, StatusReport};
use keel_core::dto::network::NetworkInfo;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{Backoff, CoordinatorLink};
use crate::sandbox::{OutputSink, Sandbox, SandboxProvider, SandboxSpec};

#[derive(Default)]
pub struct FakeLink {
    pub reports: Mutex<Vec<(Uuid, StatusReport)>>,
    pub cancel_requested: AtomicBool,
    /// Reports accepted before the coordinator answers not_owner
    pub accept_limit: Option<usize>,
    pub queue: Mutex<VecDeque<Assignment>>,
    /// Returned by the next heartbeat
    pub cancel_jobs: Mutex<Vec<Uuid>>,
}

impl FakeLink {
    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.reports().iter().map(|r| r.status).collect()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.reports().into_iter().flat_map(|r| r.logs).collect()
    }

    /// Terminal statuses reported per job
    pub fn finished(&self) -> HashMap<Uuid, JobStatus> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.status.is_terminal())
            .map(|(id, r)| (*id, r.status))
            .collect()
    }
}

#[async_trait]
impl CoordinatorLink for FakeLink {
    async fn register(&self, req: &RegisterAgent) -> keel_client::Result<Registration> {
        Ok(Registration {
            agent_id: req.agent_id.clone(),
            token: Uuid::new_v4(),
            heartbeat_interval_seconds: 1,
            heartbeat_timeout_seconds: 3,
        })
    }

    async fn heartbeat(&self) -> keel_client::Result<HeartbeatResponse> {
        Ok(HeartbeatResponse {
            cancel_jobs: std::mem::take(&mut *self.cancel_jobs.lock().unwrap()),
        })
    }

    async fn claim(&self) -> keel_client::Result<Option<Assignment>> {
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn report(&self, job_id: Uuid, report: &StatusReport) -> keel_client::Result<StatusAck> {
        let mut reports = self.reports.lock().unwrap();
        if self.accept_limit.is_some_and(|limit| reports.len() >= limit) {
            return Err(ClientError::api_error(
                409,
                r#"{"error":"job is held by another agent","code":"not_owner"}"#,
            ));
        }
        reports.push((job_id, report.clone()));
        Ok(StatusAck {
            job_id,
            status: report.status,
            cancel_requested: self.cancel_requested.load(Ordering::SeqCst),
        })
    }

    async fn network_info(&self) -> keel_client::Result<NetworkInfo> {
        Ok(NetworkInfo::default())
    }
}

#[derive(Default)]
pub struct FakeState {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub exit_codes: HashMap<String, i32>,
    /// Commands that never finish
    pub hang: Vec<String>,
}

impl FakeState {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

pub struct FakeProvider(pub Arc<FakeState>);

struct FakeSandbox(Arc<FakeState>);

#[async_trait]
impl SandboxProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, _spec: &SandboxSpec) -> anyhow::Result<Box<dyn Sandbox>> {
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSandbox(Arc::clone(&self.0))))
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        "fake"
    }

    async fn exec(&self, command: &str, sink: OutputSink<'_>) -> anyhow::Result<i32> {
        self.0.commands.lock().unwrap().push(command.to_string());
        sink(format!("output of {}", command));
        if self.0.hang.iter().any(|c| c == command) {
            std::future::pending::<()>().await;
        }
        Ok(self.0.exit_codes.get(command).copied().unwrap_or(0))
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config() -> Config {
    let mut config = Config::new("agent-1".to_string(), "http://localhost:8080".to_string());
    config.progress_interval = Duration::from_millis(20);
    config.poll_interval = Duration::from_millis(10);
    config
}

pub fn fast_backoff() -> Backoff {
    Backoff {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
    }
}

pub fn steps(commands: &[&str]) -> Vec<Step> {
    commands
        .iter()
        .enumerate()
        .map(|(i, run)| Step {
            name: format!("step-{}", i + 1),
            run: run.to_string(),
        })
        .collect()
}

/// Polls `check` until it holds or a second passes
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
