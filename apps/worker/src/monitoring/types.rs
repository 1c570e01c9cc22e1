use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Certificates with this many days left or fewer are reported as expiring soon
pub const EXPIRY_WARNING_DAYS: i64 = 30;

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome of a single uptime probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UptimeResult {
    /// Response status was exactly 200
    pub reachable: bool,
    /// Wall-clock latency; absent when no response was received
    pub latency_ms: Option<u64>,
}

impl UptimeResult {
    pub fn unreachable() -> Self {
        Self { reachable: false, latency_ms: None }
    }
}

/// TLS certificate state of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsReport {
    pub is_valid: bool,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    /// Set only when a certificate was read; absent in older documents
    pub is_expired: Option<bool>,
    pub error: Option<String>,
}

impl TlsReport {
    /// Build a report from certificate validity, measured against `now`.
    ///
    /// Days remaining are whole days rounded towards negative infinity, so a
    /// certificate that expired an hour ago has -1 days left, not 0.
    pub fn from_validity(
        issuer: String,
        subject: String,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let days_remaining = (valid_to - now).num_seconds().div_euclid(SECONDS_PER_DAY);
        Self {
            is_valid: days_remaining > 0,
            issuer: Some(issuer),
            subject: Some(subject),
            valid_from: Some(valid_from),
            valid_to: Some(valid_to),
            days_remaining: Some(days_remaining),
            is_expired: Some(days_remaining <= 0),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            issuer: None,
            subject: None,
            valid_from: None,
            valid_to: None,
            days_remaining: None,
            is_expired: None,
            error: Some(error.into()),
        }
    }

    pub fn is_expiring_soon(&self) -> bool {
        self.is_valid && self.days_remaining.is_some_and(|days| days <= EXPIRY_WARNING_DAYS)
    }
}

/// On-page SEO signals of a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeoReport {
    pub title: String,
    pub title_length: usize,
    pub meta_description: String,
    pub meta_description_length: usize,
    pub h1_count: usize,
    pub h2_count: usize,
    pub image_count: usize,
    pub images_without_alt: usize,
    pub issues: Vec<String>,
    pub has_issues: bool,
    pub error: Option<String>,
}

impl SeoReport {
    /// A report carrying only the reason the page could not be analyzed
    pub fn failure(error: impl Into<String>) -> Self {
        Self { error: Some(error.into()), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn report_with_days(days: i64) -> TlsReport {
        let now = Utc::now();
        TlsReport::from_validity(
            "Let's Encrypt".into(),
            "example.com".into(),
            now - Duration::days(60),
            now + Duration::days(days),
            now,
        )
    }

    #[test]
    fn test_validity_follows_days_remaining() {
        for (days, valid) in [(-1, false), (0, false), (1, true), (365, true)] {
            let report = report_with_days(days);
            assert_eq!(report.days_remaining, Some(days), "days = {days}");
            assert_eq!(report.is_valid, valid, "days = {days}");
            assert_eq!(report.is_expired, Some(!valid), "days = {days}");
            assert!(report.error.is_none());
        }
    }

    #[test]
    fn test_partial_day_rounds_down() {
        let now = Utc::now();
        let report = TlsReport::from_validity(
            "CA".into(),
            "host".into(),
            now - Duration::days(1),
            now - Duration::hours(1),
            now,
        );
        assert_eq!(report.days_remaining, Some(-1));
        assert!(!report.is_valid);

        let report = TlsReport::from_validity(
            "CA".into(),
            "host".into(),
            now - Duration::days(1),
            now + Duration::hours(47),
            now,
        );
        assert_eq!(report.days_remaining, Some(1));
        assert!(report.is_valid);
    }

    #[test]
    fn test_failure_is_never_valid() {
        let report = TlsReport::failure("Connection timeout");
        assert!(!report.is_valid);
        assert_eq!(report.error.as_deref(), Some("Connection timeout"));
        assert!(report.days_remaining.is_none());
        assert!(report.is_expired.is_none());
        assert!(!report.is_expiring_soon());
    }

    #[test]
    fn test_expiring_soon_threshold() {
        assert!(report_with_days(30).is_expiring_soon());
        assert!(!report_with_days(31).is_expiring_soon());
        assert!(!report_with_days(0).is_expiring_soon());
    }

    #[test]
    fn test_reports_serialize_camel_case() {
        let json = serde_json::to_value(report_with_days(10)).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["daysRemaining"], 10);
        assert_eq!(json["isExpired"], false);

        let json = serde_json::to_value(report_with_days(0)).unwrap();
        assert_eq!(json["isExpired"], true);

        let json = serde_json::to_value(SeoReport::failure("Request timeout")).unwrap();
        assert_eq!(json["error"], "Request timeout");
        assert_eq!(json["hasIssues"], false);
    }

    #[test]
    fn test_stored_report_without_expiry_flag_still_reads() {
        let stored = r#"{"isValid":true,"issuer":"CA","subject":"host","validFrom":null,
            "validTo":null,"daysRemaining":12,"error":null}"#;
        let report: TlsReport = serde_json::from_str(stored).unwrap();
        assert_eq!(report.days_remaining, Some(12));
        assert!(report.is_expired.is_none());
    }
}
