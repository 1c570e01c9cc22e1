/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Prepares the database schema and builds the probes, cycles and sweeper
/// - Drives the daily scheduler until the process is asked to stop
/// - Runs individual jobs, or the whole pipeline, on demand
pub mod retention;


pub use retention::{RetentionPolicy, RetentionStats, RetentionSweeper, SweepSummary};

use anyhow::{Result, bail};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::Config;
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::monitoring::scheduler::build_schedules;
use crate::monitoring::{JobKind, JobRunner, MonitoringExecutor, MonitoringScheduler, Probes};
use crate::notify::{AlertDispatcher, EmailAlerter};
use crate::pool::LibsqlPool;

/// The job entry points the scheduler triggers
pub struct Pipeline {
    executor: MonitoringExecutor,
    sweeper: RetentionSweeper,
}

impl Pipeline {
    pub fn new(executor: MonitoringExecutor, sweeper: RetentionSweeper) -> Self {
        Self { executor, sweeper }
    }
}

#[async_trait::async_trait]
impl JobRunner for Pipeline {
    async fn run_job(&self, kind: JobKind) -> Result<()> {
        match kind {
            JobKind::Health => {
                self.executor.run_health_checks().await?;
            }
            JobKind::Ssl => {
                self.executor.run_ssl_checks().await?;
            }
            JobKind::Seo => {
                self.executor.run_seo_analysis().await?;
            }
            JobKind::Cleanup => {
                self.sweeper.run_cleanup().await?;
            }
        }
        Ok(())
    }
}

/// Main orchestrator for the Sitewatch worker
pub struct Orchestrator {
    config: Arc<Config>,
    pool: LibsqlPool,
    pipeline: Arc<Pipeline>,
    sweeper: RetentionSweeper,
}

impl Orchestrator {
    /// Create a new orchestrator with network probes and email alerts
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let probes = Probes::from_config(&config.probes)?;
        let alerts = Arc::new(EmailAlerter::new(config.email.clone()));
        Self::with_components(config, pool, probes, alerts).await
    }

    /// Create an orchestrator around the given probes and alert channel
    pub async fn with_components(
        config: Config,
        pool: LibsqlPool,
        probes: Probes,
        alerts: Arc<dyn AlertDispatcher>,
    ) -> Result<Self> {
        let conn = pool.get().await?;
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool.clone()));
        let policy = RetentionPolicy::from(&config.retention);

        let executor =
            MonitoringExecutor::new(database.clone(), probes, alerts, config.probes.concurrency);
        let pipeline = Pipeline::new(
            executor,
            RetentionSweeper::new(database.clone(), policy.clone()),
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            pipeline: Arc::new(pipeline),
            sweeper: RetentionSweeper::new(database, policy),
        })
    }

    /// Run the scheduler until Ctrl+C, then let running jobs finish and close the pool
    pub async fn run(self) -> Result<()> {
        info!("Starting Sitewatch worker...");

        let schedules = build_schedules(&self.config.schedule)?;
        let scheduler = MonitoringScheduler::new(self.pipeline.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = scheduler.start(schedules, shutdown_rx);

        info!("Scheduler started with {} jobs. Press Ctrl+C to stop.", handles.len());
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received, stopping scheduler...");
        shutdown_tx.send_replace(true);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Timer task ended abnormally: {}", e);
            }
        }

        scheduler.wait_idle().await;
        self.pool.close();
        info!("Worker stopped");
        Ok(())
    }

    /// Run one job now, or every job in pipeline order when `job` is `None`.
    ///
    /// A failing job does not stop the ones after it; the run fails if any did.
    pub async fn run_once(&self, job: Option<JobKind>) -> Result<()> {
        let jobs = match job {
            Some(kind) => vec![kind],
            None => JobKind::ALL.to_vec(),
        };

        let mut failed = Vec::new();
        for kind in jobs {
            info!("Running job: {}", kind.name());
            if let Err(e) = self.pipeline.run_job(kind).await {
                error!("Job failed: {}: {:#}", kind.name(), e);
                failed.push(kind.id());
            }
        }

        if !failed.is_empty() {
            bail!("jobs failed: {}", failed.join(", "));
        }
        Ok(())
    }

    /// Close the connection pool
    pub fn close(self) {
        self.pool.close();
    }

    /// Current visitor token and guest website counts
    pub async fn stats(&self) -> Result<RetentionStats> {
        self.sweeper.stats().await
    }
}
