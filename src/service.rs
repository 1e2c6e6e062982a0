//! The two scheduled entry points, wired together once at startup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::email_log::{DispatchReport, Dispatcher, LockManager};
use crate::error::Result;
use crate::matching::{MatchRunReport, MatchingEngine};
use crate::scheduler::Task;
use crate::store::{EmailLogStore, StatusCounts};

/// Outcome of one email log invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmailLogRun {
    /// Stale `failed-once` claims moved to `failed-twice`.
    pub escalated: usize,
    /// Stale `empty` claims moved to `failed-once` and made claimable.
    pub requeued: usize,
    pub claimed: usize,
    pub dispatch: DispatchReport,
}

/// Report from whichever task ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "kebab-case")]
pub enum TaskReport {
    EmailLog(EmailLogRun),
    AutoMatch(MatchRunReport),
}

pub struct NotificationService {
    store: Arc<dyn EmailLogStore>,
    lock: LockManager,
    dispatcher: Arc<Dispatcher>,
    matching: MatchingEngine,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn EmailLogStore>,
        lock: LockManager,
        dispatcher: Arc<Dispatcher>,
        matching: MatchingEngine,
    ) -> Self {
        Self {
            store,
            lock,
            dispatcher,
            matching,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Escalate stale claims, claim a batch and deliver it.
    pub async fn process_email_log(&self) -> Result<EmailLogRun> {
        self.process_email_log_at(Utc::now()).await
    }

    pub async fn process_email_log_at(&self, now: DateTime<Utc>) -> Result<EmailLogRun> {
        let batch = self.lock.claim(now).await?;
        let mut run = EmailLogRun {
            escalated: batch.escalated,
            requeued: batch.requeued,
            claimed: batch.records.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            info!(escalated = run.escalated, requeued = run.requeued, "No emails due");
            return Ok(run);
        }
        run.dispatch = self.dispatcher.dispatch(&batch).await?;
        Ok(run)
    }

    /// One automatic matching pass.
    pub async fn auto_email_match(&self) -> Result<MatchRunReport> {
        self.matching.run().await
    }

    pub async fn run_task(&self, task: Task) -> Result<TaskReport> {
        match task {
            Task::EmailLog => self.process_email_log().await.map(TaskReport::EmailLog),
            Task::AutoMatch => self.auto_email_match().await.map(TaskReport::AutoMatch),
        }
    }

    /// Rows per status, for operators.
    pub async fn status_counts(&self) -> Result<StatusCounts> {
        Ok(self.store.status_counts().await?)
    }
}
