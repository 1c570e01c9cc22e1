//! Command line interface for the worker.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::monitoring::JobKind;

/// Sitewatch website monitoring worker
#[derive(Parser)]
#[command(name = "sitewatch")]
#[command(about = "Scheduled uptime, TLS and SEO checks for monitored websites")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daily scheduler in the foreground (default)
    Run,

    /// Run a job immediately and exit
    Once {
        #[arg(value_enum)]
        job: OnceJob,
    },

    /// Show visitor token and guest website counts
    Stats,

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnceJob {
    Health,
    Ssl,
    Seo,
    Cleanup,
    /// Every job in order: health, ssl, seo, cleanup
    All,
}

impl OnceJob {
    /// The single job to run, `None` meaning all of them
    pub fn kind(self) -> Option<JobKind> {
        match self {
            OnceJob::Health => Some(JobKind::Health),
            OnceJob::Ssl => Some(JobKind::Ssl),
            OnceJob::Seo => Some(JobKind::Seo),
            OnceJob::Cleanup => Some(JobKind::Cleanup),
            OnceJob::All => None,
        }
    }
}
