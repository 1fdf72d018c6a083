//! Jobs, triggers and per-job run bookkeeping.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::cron::CronSchedule;
use crate::resources::ResourceRegistry;
use crate::types::{Error, JobId, Result};

/// Future returned by a job action.
pub type JobFuture = BoxFuture<'static, Result<()>>;

/// Job body. Receives the registry so it can look up the resources it needs.
pub type JobAction = Arc<dyn Fn(Arc<ResourceRegistry>) -> JobFuture + Send + Sync>;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Cron schedule on the UTC clock.
    Cron(CronSchedule),
    /// Fixed period, first tick one period after scheduling.
    Interval(Duration),
    /// Single run after the scheduler starts (or after being added).
    Once { delay: Duration },
}

impl Trigger {
    pub fn cron(expr: &str) -> Result<Self> {
        Ok(Self::Cron(CronSchedule::parse(expr)?))
    }

    pub fn every(period: Duration) -> Self {
        Self::Interval(period)
    }

    pub fn once() -> Self {
        Self::Once {
            delay: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Interval(period) if period.is_zero() => {
                Err(Error::validation("interval trigger period must be positive"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(schedule) => write!(f, "cron[{}]", schedule),
            Trigger::Interval(period) => write!(f, "interval[{}ms]", period.as_millis()),
            Trigger::Once { delay } => write!(f, "once[+{}ms]", delay.as_millis()),
        }
    }
}

/// Tracks where a trigger is in its sequence of ticks.
#[derive(Debug, Default)]
pub(crate) struct TriggerCursor {
    last_deadline: Option<Instant>,
    last_cron: Option<DateTime<Utc>>,
    fired_once: bool,
}

impl TriggerCursor {
    /// Next tick deadline, or `None` when the trigger is exhausted.
    ///
    /// Ticks missed while a run was in progress are skipped, not replayed.
    pub(crate) fn next_deadline(&mut self, trigger: &Trigger) -> Option<Instant> {
        let now = Instant::now();
        let deadline = match trigger {
            Trigger::Once { delay } => {
                if self.fired_once {
                    return None;
                }
                self.fired_once = true;
                now + *delay
            }
            Trigger::Interval(period) => {
                let mut next = self.last_deadline.unwrap_or(now) + *period;
                while next <= now {
                    next += *period;
                }
                next
            }
            Trigger::Cron(schedule) => {
                let wall_now = Utc::now();
                let from = match self.last_cron {
                    Some(last) if last > wall_now => last,
                    _ => wall_now,
                };
                let fire_at = schedule.next_after(from)?;
                self.last_cron = Some(fire_at);
                now + (fire_at - wall_now).to_std().unwrap_or(Duration::ZERO)
            }
        };
        self.last_deadline = Some(deadline);
        Some(deadline)
    }
}

/// A registered unit of background work.
#[derive(Clone)]
pub struct Job {
    pub id: JobId,
    pub trigger: Trigger,
    pub(crate) action: JobAction,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new<F, Fut>(id: JobId, trigger: Trigger, action: F) -> Self
    where
        F: Fn(Arc<ResourceRegistry>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id,
            trigger,
            action: Arc::new(move |registry: Arc<ResourceRegistry>| -> JobFuture {
                Box::pin(action(registry))
            }),
        }
    }
}

/// Snapshot of one job's run history.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub trigger: String,
    pub runs: u64,
    pub failures: u64,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    /// Most recent failure; kept after later successful runs.
    pub last_error: Option<String>,
}

impl JobStatus {
    pub(crate) fn new(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            trigger: job.trigger.to_string(),
            runs: 0,
            failures: 0,
            running: false,
            last_run: None,
            last_error: None,
        }
    }
}
