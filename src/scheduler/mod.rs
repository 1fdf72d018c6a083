//! Background job scheduler.
//!
//! Every job gets its own driver task that sleeps until the next trigger
//! tick and then runs the action inline, so one job never overlaps itself
//! while different jobs run concurrently. `stop()` cancels all pending
//! ticks immediately and waits for runs already in progress; a run is never
//! cut short. A removed job keeps its id reserved until its last run ends.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::recovery::catch_panic;
use crate::resources::ResourceRegistry;
use crate::types::{Error, JobId, Result, SchedulerConfig};

pub mod cron;
mod job;

pub use cron::CronSchedule;
pub use job::{Job, JobAction, JobFuture, JobStatus, Trigger};

use job::TriggerCursor;

/// Scheduler run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

struct JobEntry {
    job: Job,
    status: Mutex<JobStatus>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        let status = JobStatus::new(&job);
        Self {
            job,
            status: Mutex::new(status),
        }
    }

    async fn run(&self, registry: &Arc<ResourceRegistry>) {
        {
            let mut status = self.status.lock().await;
            status.running = true;
            status.last_run = Some(Utc::now());
        }

        let started = Instant::now();
        let result = match catch_panic((self.job.action)(registry.clone())).await {
            Ok(result) => result,
            Err(panic_msg) => Err(Error::internal(format!("job panicked: {}", panic_msg))),
        };

        let mut status = self.status.lock().await;
        status.running = false;
        status.runs += 1;
        match result {
            Ok(()) => {
                tracing::debug!(
                    "job_completed: id={}, elapsed_ms={}",
                    self.job.id,
                    started.elapsed().as_millis()
                );
            }
            Err(e) => {
                status.failures += 1;
                status.last_error = Some(e.to_string());
                tracing::warn!("job_failed: id={}, error={}", self.job.id, e);
            }
        }
    }
}

struct Driver {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

struct Core {
    state: SchedulerState,
    jobs: BTreeMap<JobId, Arc<JobEntry>>,
    drivers: HashMap<JobId, Driver>,
    /// Drivers of removed jobs whose last run may still be going.
    retiring: HashMap<JobId, Driver>,
}

struct Inner {
    registry: Arc<ResourceRegistry>,
    core: Mutex<Core>,
    token: CancellationToken,
    shutdown_grace: Duration,
}

/// Cloneable scheduler handle.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("shutdown_grace", &self.inner.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(registry: Arc<ResourceRegistry>, config: &SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                core: Mutex::new(Core {
                    state: SchedulerState::Idle,
                    jobs: BTreeMap::new(),
                    drivers: HashMap::new(),
                    retiring: HashMap::new(),
                }),
                token: CancellationToken::new(),
                shutdown_grace: config.shutdown_grace,
            }),
        }
    }

    /// Begin running registered jobs. No-op if already running.
    pub async fn start(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        match core.state {
            SchedulerState::Running => return Ok(()),
            SchedulerState::Stopped => {
                return Err(Error::state_transition("scheduler cannot restart after stop"))
            }
            SchedulerState::Idle => {}
        }

        core.state = SchedulerState::Running;
        let entries: Vec<Arc<JobEntry>> = core.jobs.values().cloned().collect();
        for entry in entries {
            let id = entry.job.id.clone();
            let driver = self.spawn_driver(entry);
            core.drivers.insert(id, driver);
        }

        tracing::info!("scheduler_started: jobs={}", core.jobs.len());
        Ok(())
    }

    /// Register a job. After `start()` it is scheduled from its next tick.
    pub async fn add_job(&self, job: Job) -> Result<JobId> {
        job.trigger.validate()?;

        let mut core = self.inner.core.lock().await;
        if core.state == SchedulerState::Stopped {
            return Err(Error::state_transition(format!(
                "cannot add job {} to a stopped scheduler",
                job.id
            )));
        }
        if core.jobs.contains_key(&job.id) {
            return Err(Error::validation(format!("job {} already registered", job.id)));
        }
        if let Some(previous) = core.retiring.get(&job.id) {
            if !previous.handle.is_finished() {
                return Err(Error::validation(format!(
                    "job {} is still finishing its last run",
                    job.id
                )));
            }
            core.retiring.remove(&job.id);
        }

        let id = job.id.clone();
        tracing::info!("job_added: id={}, trigger={}", id, job.trigger);
        let entry = Arc::new(JobEntry::new(job));
        core.jobs.insert(id.clone(), entry.clone());

        if core.state == SchedulerState::Running {
            let driver = self.spawn_driver(entry);
            core.drivers.insert(id.clone(), driver);
        }

        Ok(id)
    }

    /// Remove a job. A run already in progress is allowed to finish, and the
    /// id cannot be re-added until it has.
    pub async fn remove_job(&self, id: &JobId) -> bool {
        let mut core = self.inner.core.lock().await;
        core.retiring.retain(|_, driver| !driver.handle.is_finished());
        if let Some(driver) = core.drivers.remove(id) {
            driver.token.cancel();
            core.retiring.insert(id.clone(), driver);
        }
        let removed = core.jobs.remove(id).is_some();
        if removed {
            tracing::info!("job_removed: id={}", id);
        }
        removed
    }

    /// Cancel pending ticks and wait for every in-flight run. Idempotent.
    ///
    /// Runs still going after the shutdown grace are logged, not cancelled.
    pub async fn stop(&self) {
        let drivers: Vec<(JobId, Driver)> = {
            let mut core = self.inner.core.lock().await;
            if core.state == SchedulerState::Stopped {
                return;
            }
            core.state = SchedulerState::Stopped;
            self.inner.token.cancel();
            let mut drivers: Vec<(JobId, Driver)> = core.drivers.drain().collect();
            drivers.extend(core.retiring.drain());
            drivers
        };

        let deadline = Instant::now() + self.inner.shutdown_grace;
        for (id, mut driver) in drivers {
            if tokio::time::timeout_at(deadline, &mut driver.handle).await.is_err() {
                tracing::warn!("job_still_running_after_grace: id={}", id);
                if let Err(e) = driver.handle.await {
                    tracing::error!("job_driver_failed: id={}, error={}", id, e);
                }
            }
        }

        tracing::info!("scheduler_stopped");
    }

    pub async fn state(&self) -> SchedulerState {
        self.inner.core.lock().await.state
    }

    pub async fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        let entry = self.inner.core.lock().await.jobs.get(id).cloned()?;
        let status = entry.status.lock().await.clone();
        Some(status)
    }

    /// Status of every registered job, ordered by id.
    pub async fn jobs(&self) -> Vec<JobStatus> {
        let entries: Vec<Arc<JobEntry>> =
            self.inner.core.lock().await.jobs.values().cloned().collect();
        let mut statuses = Vec::with_capacity(entries.len());
        for entry in entries {
            statuses.push(entry.status.lock().await.clone());
        }
        statuses
    }

    fn spawn_driver(&self, entry: Arc<JobEntry>) -> Driver {
        let token = self.inner.token.child_token();
        let handle = tokio::spawn(drive(entry, self.inner.registry.clone(), token.clone()));
        Driver { handle, token }
    }
}

async fn drive(entry: Arc<JobEntry>, registry: Arc<ResourceRegistry>, token: CancellationToken) {
    let mut cursor = TriggerCursor::default();

    while let Some(deadline) = cursor.next_deadline(&entry.job.trigger) {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        // A tick racing with stop() is dropped.
        if token.is_cancelled() {
            break;
        }
        entry.run(&registry).await;
    }

    tracing::debug!("job_driver_exited: id={}", entry.job.id);
}
