use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("No config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub probes: ProbeConfig,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub health_timeout_seconds: u64,
    pub ssl_timeout_seconds: u64,
    pub seo_timeout_seconds: u64,
    /// Targets probed in parallel within a single cycle
    pub concurrency: usize,
}

/// Daily anchors for the jobs. TLS and SEO run at fixed offsets after the
/// health check anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub health_check_hour: u32,
    pub health_check_minute: u32,
    pub cleanup_hour: u32,
    pub cleanup_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a flagged token is kept before it and its guest sites are purged
    pub purge_after_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "sitewatch.db".into(), pool_size: 8 }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            health_timeout_seconds: 10,
            ssl_timeout_seconds: 10,
            seo_timeout_seconds: 15,
            concurrency: 8,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { health_check_hour: 9, health_check_minute: 0, cleanup_hour: 0, cleanup_minute: 0 }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { purge_after_days: 7 }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self { host: "smtp.gmail.com".into(), port: 587, user: None, password: None }
    }
}

impl EmailConfig {
    /// Both user and password are present and non-empty
    pub fn has_credentials(&self) -> bool {
        matches!(
            (self.user.as_deref(), self.password.as_deref()),
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty()
        )
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/sitewatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("sitewatch/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let masked = |value: &Option<String>| match value.as_deref() {
            Some(v) if !v.is_empty() => "********",
            _ => "<unset>",
        };

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Pool Size", &self.database.pool_size)?;
        write_title_1(f, "Probes")?;
        write_1(f, "Health Timeout (s)", &self.probes.health_timeout_seconds)?;
        write_1(f, "SSL Timeout (s)", &self.probes.ssl_timeout_seconds)?;
        write_1(f, "SEO Timeout (s)", &self.probes.seo_timeout_seconds)?;
        write_1(f, "Concurrency", &self.probes.concurrency)?;
        write_title_1(f, "Schedule")?;
        write_1(
            f,
            "Health Checks",
            &format_args!(
                "{:02}:{:02}",
                self.schedule.health_check_hour, self.schedule.health_check_minute
            ),
        )?;
        write_1(
            f,
            "Cleanup",
            &format_args!("{:02}:{:02}", self.schedule.cleanup_hour, self.schedule.cleanup_minute),
        )?;
        write_title_1(f, "Retention")?;
        write_1(f, "Purge After (days)", &self.retention.purge_after_days)?;
        write_title_1(f, "Email")?;
        write_1(f, "Host", &format_args!("{}:{}", self.email.host, self.email.port))?;
        write_1(f, "User", &self.email.user.as_deref().unwrap_or("<unset>"))?;
        write_1(f, "Password", &masked(&self.email.password))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/sitewatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Load the file config, then layer environment overrides on top and validate
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply overrides from `lookup`, keyed by the environment variable names
    /// the worker has always understood.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &'static str,
            slot: &mut T,
        ) -> Result<(), ConfigError>
        where
            T::Err: fmt::Display,
        {
            if let Some(raw) = lookup(key) {
                *slot = raw
                    .trim()
                    .parse()
                    .map_err(|e: T::Err| ConfigError::Invalid { key, reason: e.to_string() })?;
            }
            Ok(())
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            self.database.path = path;
        }

        let probes = &mut self.probes;
        parse(&lookup, "HEALTH_CHECK_TIMEOUT", &mut probes.health_timeout_seconds)?;
        parse(&lookup, "SSL_CHECK_TIMEOUT", &mut probes.ssl_timeout_seconds)?;
        parse(&lookup, "SEO_ANALYSIS_TIMEOUT", &mut probes.seo_timeout_seconds)?;
        parse(&lookup, "PROBE_CONCURRENCY", &mut probes.concurrency)?;

        let schedule = &mut self.schedule;
        parse(&lookup, "HEALTH_CHECK_HOUR", &mut schedule.health_check_hour)?;
        parse(&lookup, "HEALTH_CHECK_MINUTE", &mut schedule.health_check_minute)?;
        parse(&lookup, "CLEANUP_HOUR", &mut schedule.cleanup_hour)?;
        parse(&lookup, "CLEANUP_MINUTE", &mut schedule.cleanup_minute)?;

        parse(&lookup, "TOKEN_RETENTION_DAYS", &mut self.retention.purge_after_days)?;
        if let Some(host) = lookup("EMAIL_HOST") {
            self.email.host = host;
        }
        parse(&lookup, "EMAIL_PORT", &mut self.email.port)?;
        if let Some(user) = lookup("EMAIL_USER") {
            self.email.user = Some(user);
        }
        if let Some(pass) = lookup("EMAIL_PASS") {
            self.email.password = Some(pass);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout("probes.health_timeout_seconds", self.probes.health_timeout_seconds)?;
        validate_timeout("probes.ssl_timeout_seconds", self.probes.ssl_timeout_seconds)?;
        validate_timeout("probes.seo_timeout_seconds", self.probes.seo_timeout_seconds)?;

        if self.probes.concurrency == 0 {
            return Err(invalid("probes.concurrency", "must be at least 1"));
        }
        if self.database.pool_size == 0 {
            return Err(invalid("database.pool_size", "must be at least 1"));
        }
        if self.schedule.health_check_hour > 23 {
            return Err(invalid("schedule.health_check_hour", "must be between 0 and 23"));
        }
        if self.schedule.cleanup_hour > 23 {
            return Err(invalid("schedule.cleanup_hour", "must be between 0 and 23"));
        }
        if self.schedule.health_check_minute > 59 {
            return Err(invalid("schedule.health_check_minute", "must be between 0 and 59"));
        }
        if self.schedule.cleanup_minute > 59 {
            return Err(invalid("schedule.cleanup_minute", "must be between 0 and 59"));
        }
        if self.retention.purge_after_days < 1 {
            return Err(invalid("retention.purge_after_days", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.to_string() }
}

/// Validate timeout is reasonable
fn validate_timeout(key: &'static str, timeout_seconds: u64) -> Result<(), ConfigError> {
    const MIN_TIMEOUT: u64 = 1;
    const MAX_TIMEOUT: u64 = 300; // 5 minutes

    if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&timeout_seconds) {
        return Err(ConfigError::Invalid {
            key,
            reason: format!(
                "{timeout_seconds} seconds is outside {MIN_TIMEOUT}..={MAX_TIMEOUT} seconds"
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_worker_conventions() {
        let config = Config::default();
        assert_eq!(config.probes.health_timeout_seconds, 10);
        assert_eq!(config.probes.ssl_timeout_seconds, 10);
        assert_eq!(config.probes.seo_timeout_seconds, 15);
        assert_eq!(config.schedule.health_check_hour, 9);
        assert_eq!(config.schedule.health_check_minute, 0);
        assert_eq!(config.schedule.cleanup_hour, 0);
        assert_eq!(config.retention.purge_after_days, 7);
        assert_eq!(config.email.host, "smtp.gmail.com");
        assert_eq!(config.email.port, 587);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("HEALTH_CHECK_TIMEOUT", "5"),
                ("HEALTH_CHECK_HOUR", "14"),
                ("HEALTH_CHECK_MINUTE", "55"),
                ("EMAIL_USER", "alerts@example.com"),
                ("EMAIL_PASS", "secret"),
                ("DATABASE_PATH", "/tmp/other.db"),
            ]))
            .unwrap();

        assert_eq!(config.probes.health_timeout_seconds, 5);
        assert_eq!(config.schedule.health_check_hour, 14);
        assert_eq!(config.schedule.health_check_minute, 55);
        assert_eq!(config.database.path, "/tmp/other.db");
        assert!(config.email.has_credentials());
    }

    #[test]
    fn test_unparsable_override_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_overrides(lookup_from(&[("EMAIL_PORT", "smtp")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "EMAIL_PORT", .. }));
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = Config::default();
        config.schedule.health_check_minute = 60;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.probes.seo_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.probes.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials() {
        let mut email = EmailConfig::default();
        assert!(!email.has_credentials());
        email.user = Some("alerts@example.com".into());
        email.password = Some(String::new());
        assert!(!email.has_credentials());
    }

    #[test]
    fn test_from_config_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.probes.concurrency, 8);
        assert!(dir.path().join("nested/config.toml").exists());

        // Partial files fall back to defaults for missing sections
        let partial = dir.path().join("partial.toml");
        fs::write(&partial, "[schedule]\nhealth_check_hour = 6\n").unwrap();
        let config = Config::from_config(Some(&partial)).unwrap();
        assert_eq!(config.schedule.health_check_hour, 6);
        assert_eq!(config.schedule.cleanup_hour, 0);
        assert_eq!(config.probes.seo_timeout_seconds, 15);
    }

    #[test]
    fn test_display_masks_password() {
        let mut config = Config::default();
        config.email.password = Some("hunter2".into());
        let rendered = config.to_string();
        assert!(rendered.contains("09:00"));
        assert!(!rendered.contains("hunter2"));
    }
}
