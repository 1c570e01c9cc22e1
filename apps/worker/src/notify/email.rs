use anyhow::Result;
use askama::Template;
use chrono::{DateTime, Local};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info, warn};

use super::AlertDispatcher;
use crate::config::EmailConfig;

/// SMTP alert channel (STARTTLS relay with login)
pub struct EmailAlerter {
    config: EmailConfig,
}

impl EmailAlerter {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    async fn deliver(&self, from: &str, password: &str, message: Message) -> Result<()> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
            .port(self.config.port)
            .credentials(Credentials::new(from.to_string(), password.to_string()))
            .build();

        mailer.send(message).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AlertDispatcher for EmailAlerter {
    async fn send_down_alert(&self, to_email: &str, display_name: &str, url: &str) -> bool {
        let credentials = self
            .config
            .user
            .as_deref()
            .zip(self.config.password.as_deref())
            .filter(|_| self.config.has_credentials());
        let Some((from, password)) = credentials else {
            warn!("Email credentials not configured, skipping alert");
            return false;
        };

        let message = match build_down_alert(from, to_email, display_name, url, Local::now()) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to build alert email for {}: {}", to_email, e);
                return false;
            }
        };

        match self.deliver(from, password, message).await {
            Ok(()) => {
                info!("Alert email sent to {} for {}", to_email, url);
                true
            }
            Err(e) => {
                error!("Failed to send alert email: {}", e);
                false
            }
        }
    }
}

/// Compose the multipart down alert
pub fn build_down_alert(
    from: &str,
    to: &str,
    display_name: &str,
    url: &str,
    checked_at: DateTime<Local>,
) -> Result<Message> {
    let check_time = checked_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let from: Mailbox = from.parse()?;
    let to: Mailbox = to.parse()?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(format!("Website Down Alert: {url}"))
        .multipart(MultiPart::alternative_plain_html(
            DownAlertText { display_name, url, check_time: &check_time }.render()?,
            DownAlertHtml { display_name, url, check_time: &check_time }.render()?,
        ))?;

    Ok(message)
}

/// Plain text part of the down alert
#[derive(Template)]
#[template(path = "down_alert.txt")]
struct DownAlertText<'a> {
    display_name: &'a str,
    url: &'a str,
    check_time: &'a str,
}

/// HTML part of the down alert; fields are escaped on render
#[derive(Template)]
#[template(path = "down_alert.html")]
struct DownAlertHtml<'a> {
    display_name: &'a str,
    url: &'a str,
    check_time: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://example.com";

    #[tokio::test]
    async fn test_missing_credentials_returns_false() {
        let alerter = EmailAlerter::new(EmailConfig::default());
        let sent = alerter.send_down_alert("owner@example.com", "Owner", SITE).await;
        assert!(!sent);

        let alerter = EmailAlerter::new(EmailConfig {
            user: Some("alerts@example.com".into()),
            password: Some(String::new()),
            ..EmailConfig::default()
        });
        let sent = alerter.send_down_alert("owner@example.com", "Owner", SITE).await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_invalid_recipient_returns_false() {
        let alerter = EmailAlerter::new(EmailConfig {
            user: Some("alerts@example.com".into()),
            password: Some("secret".into()),
            ..EmailConfig::default()
        });
        assert!(!alerter.send_down_alert("not an address", "Owner", "https://example.com").await);
    }

    #[test]
    fn test_message_contents() {
        let message = build_down_alert(
            "alerts@example.com",
            "owner@example.com",
            "Ada",
            "https://example.com",
            Local::now(),
        )
        .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Website Down Alert: https://example.com"));
        assert!(raw.contains("To: owner@example.com"));
        assert!(raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_bodies_mention_site_and_user() {
        let check_time = "2024-01-01 09:00:00";
        let plain = DownAlertText { display_name: "Ada", url: "https://example.com", check_time }
            .render()
            .unwrap();
        assert!(plain.starts_with("Hi Ada,"));
        assert!(plain.contains("Website: https://example.com"));
        assert!(plain.contains("Checked at: 2024-01-01 09:00:00"));

        let html = DownAlertHtml { display_name: "Ada", url: "https://example.com", check_time }
            .render()
            .unwrap();
        assert!(html.contains("<h2>Website Down Alert</h2>"));
        assert!(html.contains("<p class=\"url\">"));
        assert!(html.contains("example.com"));
        assert!(html.contains("Checked at: 2024-01-01 09:00:00"));
    }

    #[test]
    fn test_html_body_escapes_user_input() {
        let html = DownAlertHtml {
            display_name: "<Ada>",
            url: "https://example.com/?a=1&b=2",
            check_time: "2024-01-01 09:00:00",
        }
        .render()
        .unwrap();
        assert!(html.contains("Hi &lt;Ada&gt;,"));
        assert!(html.contains("a=1&amp;b=2"));
        assert!(!html.contains("<Ada>"));

        // the plain part carries the text as is
        let plain = DownAlertText {
            display_name: "<Ada>",
            url: "https://example.com/?a=1&b=2",
            check_time: "2024-01-01 09:00:00",
        }
        .render()
        .unwrap();
        assert!(plain.contains("Hi <Ada>,"));
        assert!(plain.contains("https://example.com/?a=1&b=2"));
    }
}
