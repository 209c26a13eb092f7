//! Job poller
//!
//! Claims jobs from the coordinator and executes them.
//! Each job runs in its own task; a semaphore bounds how many run at once.
//! A separate heartbeat loop keeps the agent registered and delivers
//! cancellation requests to running jobs.

use anyhow::Result;
use keel_core::dto::agent::{RegisterAgent, Registration};
use keel_core::dto::job::Assignment;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::{Backoff, CoordinatorLink, with_retry};
use crate::scheduler::runner::{JobOutcome, JobRunner};

/// Cancellation handles of the jobs running on this agent
type RunningJobs = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Job poller that continuously claims and executes jobs
pub struct JobPoller {
    config: Arc<Config>,
    link: Arc<dyn CoordinatorLink>,
    runner: Arc<JobRunner>,
    registration: RegisterAgent,
    semaphore: Arc<Semaphore>,
    running: RunningJobs,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(
        config: Arc<Config>,
        link: Arc<dyn CoordinatorLink>,
        runner: Arc<JobRunner>,
        registration: RegisterAgent,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs as usize));
        Self {
            config,
            link,
            runner,
            registration,
            semaphore,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs the claim loop until `shutdown` fires, then waits for in-flight
    /// jobs to be abandoned and their sandboxes destroyed
    pub async fn run(&self, registration: Registration, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, max concurrent jobs: {})",
            self.config.poll_interval, self.config.max_concurrent_jobs
        );

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.link),
            self.registration.clone(),
            Duration::from_secs(registration.heartbeat_interval_seconds.max(1)),
            Arc::clone(&self.running),
            shutdown.clone(),
        ));

        let mut tasks: JoinSet<(Uuid, JobOutcome)> = JoinSet::new();
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            while let Some(finished) = tasks.try_join_next() {
                log_finished(finished);
            }

            let claimed = self.claim_available(&mut tasks, &shutdown).await;
            if claimed > 0 {
                info!("Claimed {} job(s) this cycle", claimed);
            }
        }

        info!("Shutting down, waiting for {} job(s) to stop", tasks.len());
        while let Some(finished) = tasks.join_next().await {
            log_finished(finished);
        }

        heartbeat.abort();
        Ok(())
    }

    /// Claims while local slots are free
    async fn claim_available(
        &self,
        tasks: &mut JoinSet<(Uuid, JobOutcome)>,
        shutdown: &CancellationToken,
    ) -> usize {
        let mut claimed = 0;

        while let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            debug!("Polling for jobs");

            match self.link.claim().await {
                Ok(Some(assignment)) => {
                    self.spawn_job_task(tasks, assignment, permit, shutdown.clone());
                    claimed += 1;
                }
                Ok(None) => {
                    debug!("No jobs available");
                    break;
                }
                Err(e) => {
                    warn!("Failed to claim job: {}", e);
                    break;
                }
            }
        }

        claimed
    }

    /// Spawns a task to execute a single job
    fn spawn_job_task(
        &self,
        tasks: &mut JoinSet<(Uuid, JobOutcome)>,
        assignment: Assignment,
        permit: OwnedSemaphorePermit,
        shutdown: CancellationToken,
    ) {
        let job_id = assignment.job.id;
        let cancel = CancellationToken::new();
        lock(&self.running).insert(job_id, cancel.clone());

        let runner = Arc::clone(&self.runner);
        let running = Arc::clone(&self.running);

        tasks.spawn(async move {
            let outcome = runner.run(assignment, cancel, shutdown).await;
            lock(&running).remove(&job_id);
            // Permit is released when dropped
            drop(permit);
            (job_id, outcome)
        });
    }
}

fn lock(running: &RunningJobs) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
    running.lock().unwrap_or_else(|e| e.into_inner())
}

fn log_finished(finished: std::result::Result<(Uuid, JobOutcome), tokio::task::JoinError>) {
    match finished {
        Ok((job_id, outcome)) => debug!(job_id = %job_id, "Job task ended: {:?}", outcome),
        Err(e) => error!("Job task panicked: {}", e),
    }
}

/// Agent heartbeat, independent of job progress reports
async fn heartbeat_loop(
    link: Arc<dyn CoordinatorLink>,
    registration: RegisterAgent,
    every: Duration,
    running: RunningJobs,
    shutdown: CancellationToken,
) {
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match link.heartbeat().await {
            Ok(response) => {
                let running = lock(&running);
                for job_id in response.cancel_jobs {
                    match running.get(&job_id) {
                        Some(cancel) => {
                            info!(job_id = %job_id, "Cancellation requested");
                            cancel.cancel();
                        }
                        None => debug!(job_id = %job_id, "Cancellation for a job not running here"),
                    }
                }
            }
            Err(e) if e.is_unknown_agent() => {
                // The coordinator forgot us or the agent was removed; claims held
                // under the old token are requeued by the coordinator
                warn!("Coordinator does not recognize this agent, registering again");
                if let Err(e) =
                    with_retry("register agent", Backoff::default(), || link.register(&registration)).await
                {
                    error!("Failed to register again: {}", e);
                }
            }
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::tests::{assignment, job};
    use crate::scheduler::testing::{
        FakeLink, FakeProvider, FakeState, config, eventually, fast_backoff, steps,
    };
    use keel_core::domain::job::JobStatus;

    struct Harness {
        link: Arc<FakeLink>,
        state: Arc<FakeState>,
        poller: Arc<JobPoller>,
    }

    fn harness(config: Config, link: FakeLink, state: FakeState) -> Harness {
        let config = Arc::new(config);
        let link = Arc::new(link);
        let state = Arc::new(state);
        let runner = JobRunner::new(
            Arc::clone(&config),
            link.clone(),
            Arc::new(FakeProvider(state.clone())),
        )
        .with_backoff(fast_backoff());
        let registration = RegisterAgent {
            agent_id: config.agent_id.clone(),
            capabilities: Vec::new(),
            address: Default::default(),
            max_concurrent_jobs: config.max_concurrent_jobs,
        };
        let poller = Arc::new(JobPoller::new(
            config,
            link.clone(),
            Arc::new(runner),
            registration,
        ));
        Harness { link, state, poller }
    }

    fn start(h: &Harness) -> (CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let shutdown = CancellationToken::new();
        let poller = Arc::clone(&h.poller);
        let token = shutdown.clone();
        let registration = Registration {
            agent_id: "agent-1".to_string(),
            token: Uuid::new_v4(),
            heartbeat_interval_seconds: 1,
            heartbeat_timeout_seconds: 3,
        };
        let handle = tokio::spawn(async move { poller.run(registration, token).await });
        (shutdown, handle)
    }

    fn queued(commands: &[&str]) -> Assignment {
        let mut job = job(&[]);
        job.steps = steps(commands);
        assignment(job)
    }

    #[tokio::test]
    async fn test_runs_queued_jobs() {
        let link = FakeLink::default();
        link.queue.lock().unwrap().extend([queued(&["make"]), queued(&["make test"])]);
        let h = harness(config(), link, FakeState::default());

        let (shutdown, handle) = start(&h);
        assert!(eventually(|| h.link.finished().len() == 2).await);
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert!(h.link.finished().values().all(|s| *s == JobStatus::Succeeded));
        assert_eq!(h.state.destroyed(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_claims() {
        let mut config = config();
        config.max_concurrent_jobs = 2;
        let link = FakeLink::default();
        link.queue
            .lock()
            .unwrap()
            .extend([queued(&["sleep"]), queued(&["sleep"]), queued(&["sleep"])]);
        let h = harness(
            config,
            link,
            FakeState {
                hang: vec!["sleep".to_string()],
                ..Default::default()
            },
        );

        let (shutdown, handle) = start(&h);
        assert!(eventually(|| h.state.created() == 2).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.state.created(), 2);
        assert_eq!(h.link.queue.lock().unwrap().len(), 1);

        // Shutdown abandons both jobs but still destroys their sandboxes
        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(h.state.destroyed(), 2);
        assert!(h.link.finished().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_delivers_cancellation() {
        let link = FakeLink::default();
        let job = queued(&["sleep"]);
        let job_id = job.job.id;
        link.queue.lock().unwrap().push_back(job);
        let h = harness(
            config(),
            link,
            FakeState {
                hang: vec!["sleep".to_string()],
                ..Default::default()
            },
        );

        let (shutdown, handle) = start(&h);
        assert!(eventually(|| h.state.created() == 1).await);
        h.link.cancel_jobs.lock().unwrap().push(job_id);

        // Heartbeat interval is one second
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(eventually(|| h.link.finished().get(&job_id) == Some(&JobStatus::Canceled)).await);
        assert_eq!(h.state.destroyed(), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
