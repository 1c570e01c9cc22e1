use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::checker::{Checker, HttpChecker};
use super::seo::SeoAnalyzer;
use super::tls::TlsChecker;
use super::types::{SeoReport, TlsReport, UptimeResult};
use crate::config::ProbeConfig;
use crate::database::Database;
use crate::database::models::{Target, TargetFilter, TargetPatch, TargetStatus};
use crate::notify::AlertDispatcher;

/// Display name used in alerts when the owner has none
const DEFAULT_DISPLAY_NAME: &str = "User";

/// Errors that fail a whole cycle. Probe problems never end up here.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("{job}: failed to load targets")]
    LoadTargets {
        job: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{job}: {failed} of {total} target updates failed")]
    WriteFailures { job: &'static str, failed: usize, total: usize },
}

/// The three probes a cycle can run
#[derive(Clone)]
pub struct Probes {
    pub uptime: Arc<dyn Checker<Report = UptimeResult>>,
    pub tls: Arc<dyn Checker<Report = TlsReport>>,
    pub seo: Arc<dyn Checker<Report = SeoReport>>,
}

impl Probes {
    /// Build the network-backed probes with their configured timeouts
    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        Ok(Self {
            uptime: Arc::new(HttpChecker::new(config.health_timeout_seconds)?),
            tls: Arc::new(TlsChecker::new(config.ssl_timeout_seconds)?),
            seo: Arc::new(SeoAnalyzer::new(config.seo_timeout_seconds)?),
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HealthSummary {
    pub checked: usize,
    pub online: usize,
    pub offline: usize,
    pub alerted: usize,
    /// Targets whose result could not be stored
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SslSummary {
    pub checked: usize,
    pub valid: usize,
    pub invalid: usize,
    pub expiring_soon: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeoSummary {
    pub analyzed: usize,
    pub with_issues: usize,
    pub errors: usize,
    pub failed: usize,
}

/// Result of one target within a cycle
enum Outcome<T> {
    Stored(T),
    /// Probe ran but the update could not be written
    WriteFailed,
    Skipped,
}

struct HealthCheck {
    online: bool,
    alerted: bool,
}

/// Monitoring executor - runs the health, TLS and SEO cycles over stored targets
pub struct MonitoringExecutor {
    database: Arc<dyn Database>,
    probes: Probes,
    alerts: Arc<dyn AlertDispatcher>,
    concurrency: usize,
}

impl MonitoringExecutor {
    /// Create a new monitoring executor
    pub fn new(
        database: Arc<dyn Database>,
        probes: Probes,
        alerts: Arc<dyn AlertDispatcher>,
        concurrency: usize,
    ) -> Self {
        Self { database, probes, alerts, concurrency: concurrency.max(1) }
    }

    async fn load(
        &self,
        job: &'static str,
        filter: TargetFilter,
    ) -> Result<Vec<Target>, CycleError> {
        self.database
            .list_targets(&filter)
            .await
            .map_err(|source| CycleError::LoadTargets { job, source })
    }

    async fn store(&self, target: &Target, patch: TargetPatch) -> bool {
        match self.database.update_target(&target.id, &patch).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to store result for {}: {:#}", target.url, e);
                false
            }
        }
    }

    /// Probe every target for liveness and alert owners of sites that just went down
    pub async fn run_health_checks(&self) -> Result<HealthSummary, CycleError> {
        let span = info_span!("cycle", job = "health_checks", run_id = %Uuid::new_v4());
        async {
            info!("Starting health checks");
            let targets = self.load("health_checks", TargetFilter::All).await?;
            if targets.is_empty() {
                info!("No websites to check");
                return Ok(HealthSummary::default());
            }
            info!("Checking {} websites", targets.len());

            let outcomes: Vec<Outcome<HealthCheck>> = stream::iter(targets)
                .map(|target| self.check_health(target))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let mut summary = HealthSummary::default();
            for outcome in outcomes {
                match outcome {
                    Outcome::Stored(check) => {
                        summary.checked += 1;
                        if check.online {
                            summary.online += 1;
                        } else {
                            summary.offline += 1;
                        }
                        if check.alerted {
                            summary.alerted += 1;
                        }
                    }
                    Outcome::WriteFailed => summary.failed += 1,
                    Outcome::Skipped => {}
                }
            }

            info!(
                "Health checks completed: {} checked, {} online, {} offline, {} alerted, {} failed",
                summary.checked, summary.online, summary.offline, summary.alerted, summary.failed
            );
            finish("health_checks", summary, summary.failed, summary.checked + summary.failed)
        }
        .instrument(span)
        .await
    }

    async fn check_health(&self, target: Target) -> Outcome<HealthCheck> {
        if target.url.is_empty() {
            return Outcome::Skipped;
        }

        let result = self.probes.uptime.check(&target.url).await;
        let patch = TargetPatch {
            last_checked_at: Some(Utc::now()),
            status: Some(TargetStatus::from_reachable(result.reachable)),
            is_active: Some(result.reachable),
            response_time_ms: result.latency_ms,
            ..Default::default()
        };

        if !self.store(&target, patch).await {
            return Outcome::WriteFailed;
        }

        if result.reachable {
            debug!("{}: online ({}ms)", target.url, result.latency_ms.unwrap_or_default());
        } else {
            warn!("{}: offline", target.url);
        }

        let went_down = target.is_active && !result.reachable;
        let alerted = went_down && self.alert_owner(&target).await;

        Outcome::Stored(HealthCheck { online: result.reachable, alerted })
    }

    /// Send a down alert to the target's owner, if it has one with an email
    async fn alert_owner(&self, target: &Target) -> bool {
        let Some(user_id) = target.owner_user_id.as_deref() else {
            return false;
        };

        let user = match self.database.find_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("Owner {} of {} not found, no alert sent", user_id, target.url);
                return false;
            }
            Err(e) => {
                error!("Failed to look up owner of {}: {:#}", target.url, e);
                return false;
            }
        };

        let Some(email) = user.email.as_deref().filter(|email| !email.is_empty()) else {
            return false;
        };
        let display_name =
            user.name.as_deref().filter(|name| !name.is_empty()).unwrap_or(DEFAULT_DISPLAY_NAME);

        self.alerts.send_down_alert(email, display_name, &target.url).await
    }

    /// Validate certificates of every HTTPS target
    pub async fn run_ssl_checks(&self) -> Result<SslSummary, CycleError> {
        let span = info_span!("cycle", job = "ssl_checks", run_id = %Uuid::new_v4());
        async {
            info!("Starting SSL certificate checks");
            let targets = self.load("ssl_checks", TargetFilter::Https).await?;
            if targets.is_empty() {
                info!("No HTTPS websites to check");
                return Ok(SslSummary::default());
            }
            info!("Checking SSL for {} websites", targets.len());

            let outcomes: Vec<Outcome<TlsReport>> = stream::iter(targets)
                .map(|target| self.check_ssl(target))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let mut summary = SslSummary::default();
            for outcome in outcomes {
                match outcome {
                    Outcome::Stored(report) => {
                        summary.checked += 1;
                        if report.is_valid {
                            summary.valid += 1;
                        } else {
                            summary.invalid += 1;
                        }
                        if report.is_expiring_soon() {
                            summary.expiring_soon += 1;
                        }
                    }
                    Outcome::WriteFailed => summary.failed += 1,
                    Outcome::Skipped => {}
                }
            }

            info!(
                "SSL checks completed: {} checked, {} valid, {} invalid, {} expiring, {} failed",
                summary.checked,
                summary.valid,
                summary.invalid,
                summary.expiring_soon,
                summary.failed
            );
            finish("ssl_checks", summary, summary.failed, summary.checked + summary.failed)
        }
        .instrument(span)
        .await
    }

    async fn check_ssl(&self, target: Target) -> Outcome<TlsReport> {
        let report = self.probes.tls.check(&target.url).await;

        if let Some(error) = &report.error {
            warn!("{}: SSL check failed: {}", target.url, error);
        } else if report.is_expiring_soon() {
            warn!(
                "{}: SSL certificate expires in {} days",
                target.url,
                report.days_remaining.unwrap_or_default()
            );
        } else if !report.is_valid {
            warn!("{}: SSL certificate expired", target.url);
        }

        let patch = TargetPatch { ssl: Some(report.clone()), ..Default::default() };
        if self.store(&target, patch).await {
            Outcome::Stored(report)
        } else {
            Outcome::WriteFailed
        }
    }

    /// Analyze the pages of every target that was online at its last health check
    pub async fn run_seo_analysis(&self) -> Result<SeoSummary, CycleError> {
        let span = info_span!("cycle", job = "seo_analysis", run_id = %Uuid::new_v4());
        async {
            info!("Starting SEO analysis");
            let targets = self.load("seo_analysis", TargetFilter::Online).await?;
            if targets.is_empty() {
                info!("No online websites to analyze");
                return Ok(SeoSummary::default());
            }
            info!("Analyzing SEO for {} websites", targets.len());

            let outcomes: Vec<Outcome<SeoReport>> = stream::iter(targets)
                .map(|target| self.analyze_seo(target))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let mut summary = SeoSummary::default();
            for outcome in outcomes {
                match outcome {
                    Outcome::Stored(report) => {
                        if report.error.is_some() {
                            summary.errors += 1;
                        } else {
                            summary.analyzed += 1;
                            if report.has_issues {
                                summary.with_issues += 1;
                            }
                        }
                    }
                    Outcome::WriteFailed => summary.failed += 1,
                    Outcome::Skipped => {}
                }
            }

            info!(
                "SEO analysis completed: {} analyzed, {} with issues, {} errors, {} failed",
                summary.analyzed, summary.with_issues, summary.errors, summary.failed
            );
            let total = summary.analyzed + summary.errors + summary.failed;
            finish("seo_analysis", summary, summary.failed, total)
        }
        .instrument(span)
        .await
    }

    async fn analyze_seo(&self, target: Target) -> Outcome<SeoReport> {
        let report = self.probes.seo.check(&target.url).await;

        match &report.error {
            Some(error) => warn!("{}: SEO analysis failed: {}", target.url, error),
            None if report.has_issues => {
                debug!("{}: {} SEO issues found", target.url, report.issues.len())
            }
            None => debug!("{}: no SEO issues", target.url),
        }

        let patch = TargetPatch { seo: Some(report.clone()), ..Default::default() };
        if self.store(&target, patch).await {
            Outcome::Stored(report)
        } else {
            Outcome::WriteFailed
        }
    }
}

/// Turn a cycle summary into its result once every target has been handled
fn finish<S>(job: &'static str, summary: S, failed: usize, total: usize) -> Result<S, CycleError> {
    if failed > 0 {
        Err(CycleError::WriteFailures { job, failed, total })
    } else {
        Ok(summary)
    }
}
