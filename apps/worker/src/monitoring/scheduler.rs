use anyhow::Result;
use chrono::{DateTime, Local};
use cron::Schedule;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ScheduleConfig;

/// Minutes after the health check at which the TLS and SEO jobs fire
const SSL_OFFSET_MINUTES: u32 = 5;
const SEO_OFFSET_MINUTES: u32 = 10;

/// The four independently scheduled jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Health,
    Ssl,
    Seo,
    Cleanup,
}

impl JobKind {
    /// Pipeline order used when every job runs once in sequence
    pub const ALL: [JobKind; 4] = [JobKind::Health, JobKind::Ssl, JobKind::Seo, JobKind::Cleanup];

    pub fn id(&self) -> &'static str {
        match self {
            JobKind::Health => "health_checks",
            JobKind::Ssl => "ssl_checks",
            JobKind::Seo => "seo_analysis",
            JobKind::Cleanup => "cleanup",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Health => "Website Health Checks",
            JobKind::Ssl => "SSL Certificate Validation",
            JobKind::Seo => "SEO Analysis",
            JobKind::Cleanup => "Token Cleanup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A job and the daily cron schedule that triggers it
#[derive(Debug, Clone)]
pub struct JobSchedule {
    pub kind: JobKind,
    pub expression: String,
    pub schedule: Schedule,
}

impl JobSchedule {
    fn daily(kind: JobKind, hour: u32, minute: u32) -> Result<Self> {
        let expression = daily_expression(hour, minute);
        let schedule = Schedule::from_str(&expression)
            .map_err(|e| anyhow::anyhow!("invalid schedule for {}: {}", kind, e))?;
        Ok(Self { kind, expression, schedule })
    }

    /// First trigger strictly after `after`
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

/// Six-field cron expression firing once a day at `hour:minute`
pub fn daily_expression(hour: u32, minute: u32) -> String {
    format!("0 {minute} {hour} * * *")
}

/// Daily schedules for all four jobs.
///
/// TLS and SEO are offset from the health check by minutes only; the hour is
/// not carried, so a health check at 9:58 puts TLS at 9:03.
pub fn build_schedules(config: &ScheduleConfig) -> Result<Vec<JobSchedule>> {
    let hour = config.health_check_hour;
    let minute = config.health_check_minute;

    Ok(vec![
        JobSchedule::daily(JobKind::Health, hour, minute)?,
        JobSchedule::daily(JobKind::Ssl, hour, (minute + SSL_OFFSET_MINUTES) % 60)?,
        JobSchedule::daily(JobKind::Seo, hour, (minute + SEO_OFFSET_MINUTES) % 60)?,
        JobSchedule::daily(JobKind::Cleanup, config.cleanup_hour, config.cleanup_minute)?,
    ])
}

/// Executes a job when the scheduler triggers it
#[async_trait::async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run_job(&self, kind: JobKind) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Panicked,
    /// The same job was still running
    Skipped,
}

/// Clears a job's running flag when the run ends, however it ends
struct RunningGuard(Arc<watch::Sender<bool>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

/// Monitoring scheduler - triggers jobs on their timers, one run per job at a time
#[derive(Clone)]
pub struct MonitoringScheduler {
    runner: Arc<dyn JobRunner>,
    running: Arc<HashMap<JobKind, Arc<watch::Sender<bool>>>>,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        let running = JobKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(watch::channel(false).0)))
            .collect();

        Self { runner, running: Arc::new(running) }
    }

    fn flag(&self, kind: JobKind) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.running[&kind])
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        *self.running[&kind].borrow()
    }

    /// Run a job now unless it is already running
    pub async fn fire(&self, kind: JobKind) -> JobOutcome {
        let flag = self.flag(kind);
        let acquired = flag.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !acquired {
            warn!("{} is still running, skipping this trigger", kind.name());
            return JobOutcome::Skipped;
        }
        let _guard = RunningGuard(flag);

        if kind == JobKind::Seo && self.is_running(JobKind::Health) {
            info!("Waiting for health checks to finish before SEO analysis");
            let mut health = self.running[&JobKind::Health].subscribe();
            let _ = health.wait_for(|running| !*running).await;
        }

        info!("Running job: {}", kind.name());
        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move { runner.run_job(kind).await });

        match handle.await {
            Ok(Ok(())) => {
                info!("Job completed: {}", kind.name());
                JobOutcome::Completed
            }
            Ok(Err(e)) => {
                error!("Job failed: {}: {:#}", kind.name(), e);
                JobOutcome::Failed
            }
            Err(e) if e.is_panic() => {
                error!("Job panicked: {}", kind.name());
                JobOutcome::Panicked
            }
            Err(e) => {
                error!("Job was cancelled: {}: {}", kind.name(), e);
                JobOutcome::Failed
            }
        }
    }

    /// Spawn one timer loop per schedule. Loops end on the first change to `shutdown`
    /// or when its sender is dropped.
    pub fn start(
        &self,
        schedules: Vec<JobSchedule>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        schedules
            .into_iter()
            .map(|job| {
                info!("Scheduled {} ({})", job.kind.name(), job.expression);
                let scheduler = self.clone();
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    let mut last = Local::now();
                    loop {
                        let Some(next) = job.next_after(&last) else {
                            warn!("{} has no upcoming run", job.kind.name());
                            break;
                        };
                        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                        info!(
                            "Next {} run at {}",
                            job.kind.name(),
                            next.format("%Y-%m-%d %H:%M:%S")
                        );

                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = shutdown.changed() => break,
                        }

                        // runs missed while the process was suspended are not replayed
                        last = next.max(Local::now());

                        let scheduler = scheduler.clone();
                        let kind = job.kind;
                        tokio::spawn(async move { scheduler.fire(kind).await });
                    }
                })
            })
            .collect()
    }

    /// Wait until no job is running
    pub async fn wait_idle(&self) {
        for flag in self.running.values() {
            let mut rx = flag.subscribe();
            let _ = rx.wait_for(|running| !*running).await;
        }
    }
}
