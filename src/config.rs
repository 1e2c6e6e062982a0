//! Configuration types.
//!
//! Everything is read from `NOTIFY_*` environment variables. Tuning values
//! fall back to their defaults when unset or unparsable; values that change
//! behaviour (security mode, schedules, the auto-match start time) must parse.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::ConfigError;
use crate::mail::SmtpSecurity;
use crate::mail::smtp::DEFAULT_SMTP_TIMEOUT;

/// Default subject for match emails.
pub const DEFAULT_MATCH_SUBJECT: &str = "We've found [property_count] matching your requirements";

/// Default body for match emails.
pub const DEFAULT_MATCH_BODY: &str = "Hi [contact_name],\n\n\
We've found [property_count] that we think you'll be interested in:\n\n\
[properties]";

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub store: StoreConfig,
    pub smtp: SmtpConfig,
    pub queue: QueueConfig,
    pub matching: MatchConfig,
    pub schedule: ScheduleConfig,
    /// Directory with template overrides, if any.
    pub template_dir: Option<PathBuf>,
    /// JSON export the snapshot directory reads contacts from.
    pub snapshot_path: Option<PathBuf>,
}

impl NotifyConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = StoreConfig {
            db_path: var("NOTIFY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/notify.db")),
        };

        let security = match var("NOTIFY_SMTP_SECURITY") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "NOTIFY_SMTP_SECURITY".into(),
                message,
            })?,
            None => SmtpSecurity::default(),
        };

        let smtp = SmtpConfig {
            host: var("NOTIFY_SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: var("NOTIFY_SMTP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            username: var("NOTIFY_SMTP_USERNAME").unwrap_or_default(),
            password: SecretString::from(var("NOTIFY_SMTP_PASSWORD").unwrap_or_default()),
            timeout: var("NOTIFY_SMTP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SMTP_TIMEOUT),
            security,
        };

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            batch_size: var("NOTIFY_BATCH_SIZE")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.batch_size),
            stale_after: var("NOTIFY_STALE_LOCK_HOURS")
                .and_then(|s| s.parse::<u64>().ok())
                .and_then(|h| h.checked_mul(60 * 60))
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
            send_timeout: var("NOTIFY_SEND_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_timeout),
        };

        let enabled_since = match var("NOTIFY_AUTO_MATCH_SINCE") {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw.trim())
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "NOTIFY_AUTO_MATCH_SINCE".into(),
                        message: e.to_string(),
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let matching = MatchConfig {
            enabled: var("NOTIFY_AUTO_MATCH")
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            enabled_since,
            default_subject: var("NOTIFY_MATCH_SUBJECT")
                .unwrap_or_else(|| DEFAULT_MATCH_SUBJECT.to_string()),
            default_body: var("NOTIFY_MATCH_BODY")
                .map(|s| s.replace("\\n", "\n"))
                .unwrap_or_else(|| DEFAULT_MATCH_BODY.to_string()),
            sender_name: var("NOTIFY_SENDER_NAME").unwrap_or_default(),
            sender_address: var("NOTIFY_SENDER_ADDRESS")
                .unwrap_or_else(|| smtp.username.clone()),
            site_url: var("NOTIFY_SITE_URL").unwrap_or_else(|| "http://localhost".to_string()),
        };

        let schedule_defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            email_log: var("NOTIFY_EMAIL_LOG_SCHEDULE").unwrap_or(schedule_defaults.email_log),
            auto_match: var("NOTIFY_AUTO_MATCH_SCHEDULE")
                .unwrap_or(schedule_defaults.auto_match),
        };
        schedule.validate()?;

        Ok(Self {
            store,
            smtp,
            queue,
            matching,
            schedule,
            template_dir: var("NOTIFY_TEMPLATE_DIR").map(PathBuf::from),
            snapshot_path: var("NOTIFY_SNAPSHOT_PATH").map(PathBuf::from),
        })
    }
}

/// Database location.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

/// Outbound SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Socket timeout handed to the SMTP client.
    pub timeout: Duration,
    pub security: SmtpSecurity,
}

/// Email log processing.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum records claimed per invocation.
    pub batch_size: usize,
    /// Claims older than this are treated as abandoned.
    pub stale_after: Duration,
    /// Upper bound on one transport call.
    pub send_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            stale_after: Duration::from_secs(24 * 60 * 60), // 24 hours
            send_timeout: Duration::from_secs(60),
        }
    }
}

/// Automatic applicant matching.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub enabled: bool,
    /// Only properties added at or after this point are matched.
    pub enabled_since: Option<DateTime<Utc>>,
    pub default_subject: String,
    pub default_body: String,
    pub sender_name: String,
    pub sender_address: String,
    /// Base URL for unsubscribe links.
    pub site_url: String,
}

impl MatchConfig {
    /// Start time when matching is switched on, `None` otherwise.
    pub fn active_since(&self) -> Option<DateTime<Utc>> {
        if self.enabled { self.enabled_since } else { None }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enabled_since: None,
            default_subject: DEFAULT_MATCH_SUBJECT.to_string(),
            default_body: DEFAULT_MATCH_BODY.to_string(),
            sender_name: String::new(),
            sender_address: String::new(),
            site_url: "http://localhost".to_string(),
        }
    }
}

/// Cron expressions (with seconds) for the two recurring tasks.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub email_log: String,
    pub auto_match: String,
}

impl ScheduleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (key, expr) in [
            ("NOTIFY_EMAIL_LOG_SCHEDULE", &self.email_log),
            ("NOTIFY_AUTO_MATCH_SCHEDULE", &self.auto_match),
        ] {
            cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
                key: key.into(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            email_log: "0 * * * * *".to_string(),   // every minute
            auto_match: "0 0 * * * *".to_string(),  // hourly
        }
    }
}
