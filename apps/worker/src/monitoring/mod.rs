/// Monitoring engine module - probes and the cycles that run them
///
/// This module is responsible for:
/// - Probing targets for uptime, TLS certificate state and on-page SEO
/// - Running each probe over the stored targets with bounded concurrency
/// - Triggering the daily jobs and keeping their runs from overlapping
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod seo;
pub mod tls;
pub mod types;

pub use executor::{CycleError, MonitoringExecutor, Probes};
pub use scheduler::{JobKind, JobRunner, MonitoringScheduler};
