//! Cron tickers driving the notification service.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::service::{NotificationService, TaskReport};

/// The recurring jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Escalate, claim and deliver queued email.
    EmailLog,
    /// Match new properties to applicant profiles.
    AutoMatch,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::EmailLog => "process-email-log",
            Task::AutoMatch => "auto-email-match",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parse a cron expression (seconds field included).
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "schedule".into(),
        message: format!("invalid cron '{expr}': {e}"),
    })
}

/// Next fire time strictly after `after`.
pub fn next_fire(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Run `task` on every tick of `schedule` until the handle is aborted.
///
/// Firings never overlap within one ticker; a run that outlasts the next
/// tick delays it.
pub fn spawn_cron_ticker(
    service: Arc<NotificationService>,
    task: Task,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire(&schedule, now) else {
                warn!(task = %task, "Schedule has no further fire times; ticker stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match service.run_task(task).await {
                Ok(TaskReport::EmailLog(run)) => info!(
                    task = %task,
                    claimed = run.claimed,
                    sent = run.dispatch.sent,
                    failed = run.dispatch.failed,
                    "Scheduled run finished"
                ),
                Ok(TaskReport::AutoMatch(report)) => info!(
                    task = %task,
                    matched = report.profiles_matched,
                    errors = report.errors,
                    "Scheduled run finished"
                ),
                Err(e) => error!(task = %task, error = %e, "Scheduled run failed"),
            }
        }
    })
}
