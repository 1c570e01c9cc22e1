use anyhow::Result;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tracing::warn;

use super::types::UptimeResult;

pub const HEALTH_CHECK_USER_AGENT: &str = "Sitewatch Health Check/1.0";

/// Checker trait for the different probes run against a target URL.
///
/// Probes never fail: transport and validation problems are folded into the
/// returned report.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    type Report: Send;

    async fn check(&self, target: &str) -> Self::Report;
}

/// Uptime checker: one GET, reachable only on a 200 response
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(HEALTH_CHECK_USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    type Report = UptimeResult;

    async fn check(&self, target: &str) -> UptimeResult {
        let start = Instant::now();

        match self.client.get(target).send().await {
            Ok(response) => {
                let latency = start.elapsed().as_millis() as u64;
                UptimeResult {
                    reachable: response.status() == StatusCode::OK,
                    latency_ms: Some(latency),
                }
            }
            Err(e) if e.is_timeout() => {
                warn!("Timeout checking {}", target);
                UptimeResult::unreachable()
            }
            Err(e) => {
                warn!("Error checking {}: {}", target, e);
                UptimeResult::unreachable()
            }
        }
    }
}
