//! Retention of visitor tokens and the guest websites they own.
//!
//! Cleanup runs in two passes:
//! - Expire: tokens past `expires_at` are flagged as expired
//! - Purge: tokens flagged and expired longer than the retention window are
//!   deleted together with their guest websites
//!
//! Both passes are idempotent, and the purge does not rely on the expire pass
//! having run in the same sweep.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::database::Database;
use crate::database::models::{TargetFilter, TokenFilter, TokenPatch};

/// Window used by the token statistics for "expiring soon"
const EXPIRING_SOON_HOURS: i64 = 24;

/// Retention policy for expired visitor tokens
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days a token stays flagged before it and its websites are purged
    pub purge_after_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { purge_after_days: 7 }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self { purge_after_days: config.purge_after_days }
    }
}

impl RetentionPolicy {
    fn purge_after(&self) -> Duration {
        Duration::days(self.purge_after_days)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: u64,
    pub purged: u64,
    pub websites_deleted: u64,
}

/// Snapshot of visitor token state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionStats {
    pub active_tokens: u64,
    pub expired_tokens: u64,
    pub expiring_soon: u64,
    pub guest_websites: u64,
}

/// Cleanup manager for expired visitor tokens
pub struct RetentionSweeper {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    /// Create a new retention sweeper
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Flag tokens whose expiry has passed, returning how many were flagged
    pub async fn expire_tokens(&self) -> Result<u64> {
        let filter = TokenFilter::LapsedUnflagged { now: Utc::now() };
        let modified =
            self.database.update_tokens(&filter, &TokenPatch { is_expired: Some(true) }).await?;

        if modified > 0 {
            info!("Marked {} tokens as expired", modified);
        }
        Ok(modified)
    }

    /// Delete tokens expired longer than the retention window, with their guest websites.
    ///
    /// Returns `(tokens purged, websites deleted)`.
    pub async fn purge_expired_tokens(&self) -> Result<(u64, u64)> {
        let cutoff = Utc::now() - self.policy.purge_after();
        let tokens = self.database.list_tokens(&TokenFilter::FlaggedBefore { cutoff }).await?;

        if tokens.is_empty() {
            debug!("No old expired tokens to purge");
            return Ok((0, 0));
        }

        let mut purged = 0;
        let mut websites_deleted = 0;

        for token in tokens {
            if !token.token_id.is_empty() {
                websites_deleted += self
                    .database
                    .delete_targets(&TargetFilter::VisitorToken(token.token_id.clone()))
                    .await?;
            }

            self.database.delete_token(&token.id).await?;
            purged += 1;
        }

        info!("Purged {} old tokens and {} associated websites", purged, websites_deleted);
        Ok((purged, websites_deleted))
    }

    /// Run both passes. Any storage error aborts the sweep.
    pub async fn run_cleanup(&self) -> Result<SweepSummary> {
        let span = info_span!("cycle", job = "cleanup", run_id = %Uuid::new_v4());
        async {
            info!(
                "Starting cleanup (purging tokens expired more than {} days ago)",
                self.policy.purge_after_days
            );

            let expired = self.expire_tokens().await?;
            let (purged, websites_deleted) = self.purge_expired_tokens().await?;

            info!("Cleanup completed: {} marked expired, {} purged", expired, purged);
            Ok(SweepSummary { expired, purged, websites_deleted })
        }
        .instrument(span)
        .await
    }

    /// Counts of active, expired and soon-to-expire tokens plus guest websites
    pub async fn stats(&self) -> Result<RetentionStats> {
        let now = Utc::now();
        let soon = TokenFilter::ExpiringBetween {
            from: now,
            to: now + Duration::hours(EXPIRING_SOON_HOURS),
        };

        Ok(RetentionStats {
            active_tokens: self.database.count_tokens(&TokenFilter::Flagged(false)).await?,
            expired_tokens: self.database.count_tokens(&TokenFilter::Flagged(true)).await?,
            expiring_soon: self.database.count_tokens(&soon).await?,
            guest_websites: self.database.count_targets(&TargetFilter::Guest).await?,
        })
    }
}
