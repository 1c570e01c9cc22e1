use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::types::{SeoReport, TlsReport};

/// Last-known liveness of a website
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Online,
    Offline,
    /// Never probed
    Unknown,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Online => "online",
            TargetStatus::Offline => "offline",
            TargetStatus::Unknown => "unknown",
        }
    }

    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { TargetStatus::Online } else { TargetStatus::Offline }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "online" => TargetStatus::Online,
            "offline" => TargetStatus::Offline,
            _ => TargetStatus::Unknown,
        })
    }
}

/// A monitored website
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub url: String,
    pub name: Option<String>,
    pub owner_user_id: Option<String>,
    /// Guest ownership, correlated with [`VisitorToken::token_id`]
    pub visitor_token: Option<String>,
    pub is_active: bool,
    pub status: TargetStatus,
    pub response_time_ms: Option<u64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub ssl: Option<TlsReport>,
    pub seo: Option<SeoReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    /// Create a new, never-checked target
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            url: url.into(),
            name: None,
            owner_user_id: None,
            visitor_token: None,
            is_active: true,
            status: TargetStatus::Unknown,
            response_time_ms: None,
            last_checked_at: None,
            ssl: None,
            seo: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }

    pub fn for_visitor(mut self, token_id: impl Into<String>) -> Self {
        self.visitor_token = Some(token_id.into());
        self
    }
}

/// Partial update applied to a single target. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TargetPatch {
    pub last_checked_at: Option<DateTime<Utc>>,
    pub status: Option<TargetStatus>,
    pub is_active: Option<bool>,
    pub response_time_ms: Option<u64>,
    pub ssl: Option<TlsReport>,
    pub seo: Option<SeoReport>,
}

impl TargetPatch {
    pub fn is_empty(&self) -> bool {
        self.last_checked_at.is_none()
            && self.status.is_none()
            && self.is_active.is_none()
            && self.response_time_ms.is_none()
            && self.ssl.is_none()
            && self.seo.is_none()
    }
}

/// Selects a set of targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFilter {
    All,
    /// URL starts with `https://` (case-sensitive)
    Https,
    /// Last uptime probe marked the target online
    Online,
    /// Guest targets created under a visitor token
    VisitorToken(String),
    /// Targets with no owning user but a visitor token
    Guest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Anonymous session that owns guest targets until it expires
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitorToken {
    pub id: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
}

impl VisitorToken {
    pub fn new(
        id: impl Into<String>,
        token_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            token_id: token_id.into(),
            expires_at,
            is_expired: false,
            created_at: Utc::now(),
        }
    }
}

/// Selects a set of visitor tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFilter {
    /// Past `expires_at` but not yet flagged
    LapsedUnflagged { now: DateTime<Utc> },
    /// Flagged and expired before `cutoff`
    FlaggedBefore { cutoff: DateTime<Utc> },
    /// Any token with the given flag value
    Flagged(bool),
    /// Not flagged and expiring within `[from, to)`
    ExpiringBetween { from: DateTime<Utc>, to: DateTime<Utc> },
}

#[derive(Debug, Clone, Default)]
pub struct TokenPatch {
    pub is_expired: Option<bool>,
}

/// Convert chrono timestamp to the unix seconds stored in the database
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored unix seconds back into a timestamp
pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("online".parse::<TargetStatus>().unwrap(), TargetStatus::Online);
        assert_eq!("offline".parse::<TargetStatus>().unwrap(), TargetStatus::Offline);
        assert_eq!("garbage".parse::<TargetStatus>().unwrap(), TargetStatus::Unknown);
        assert_eq!(TargetStatus::from_reachable(true).to_string(), "online");
        assert_eq!(TargetStatus::from_reachable(false).to_string(), "offline");
    }

    #[test]
    fn test_new_target_is_unchecked() {
        let target = Target::new("site-1", "https://example.com").owned_by("user-1");
        assert_eq!(target.status, TargetStatus::Unknown);
        assert!(target.is_active);
        assert!(target.last_checked_at.is_none());
        assert_eq!(target.owner_user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_empty_patch() {
        assert!(TargetPatch::default().is_empty());
        let patch = TargetPatch { is_active: Some(false), ..Default::default() };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_timestamp_conversion_truncates_to_seconds() {
        let now = Utc::now();
        let restored = i64_to_timestamp(timestamp_to_i64(now));
        assert_eq!(restored.timestamp(), now.timestamp());
    }
}
