//! Claim semantics over the email log.
//!
//! One `claim()` call is one invocation's reservation step: escalate stale
//! claims, then stamp a fresh lock id on a bounded batch and read it back.
//! Exclusivity rests on the store's conditional updates; there is no
//! in-process locking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::email_log::model::{EmailLogRecord, EmailStatus};
use crate::error::DatabaseError;
use crate::store::EmailLogStore;

/// Records reserved for one invocation.
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub lock_id: String,
    pub records: Vec<EmailLogRecord>,
    /// Stale `failed-once` claims escalated to `failed-twice` in this pass.
    pub escalated: usize,
    /// Stale `empty` claims requeued as `failed-once` in this pass.
    pub requeued: usize,
}

impl ClaimedBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reserves bounded batches of sendable records.
pub struct LockManager {
    store: Arc<dyn EmailLogStore>,
    batch_size: usize,
    stale_after: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn EmailLogStore>, batch_size: usize, stale_after: Duration) -> Self {
        Self {
            store,
            batch_size,
            stale_after,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run the escalation passes and claim a batch as of `now`.
    ///
    /// Escalation runs before claiming so a just-stale record is never
    /// reclaimed under its old lock state.
    pub async fn claim(&self, now: DateTime<Utc>) -> Result<ClaimedBatch, DatabaseError> {
        let (escalated, requeued) = self.escalate_stale(now).await?;

        let lock_id = Uuid::new_v4().to_string();
        let claimed = self
            .store
            .claim_batch(&lock_id, now, self.batch_size)
            .await?;

        let records = if claimed == 0 {
            Vec::new()
        } else {
            self.store.get_locked(&lock_id).await?
        };

        if !records.is_empty() {
            info!(lock_id = %lock_id, count = records.len(), "Claimed emails for sending");
        }

        Ok(ClaimedBatch {
            lock_id,
            records,
            escalated,
            requeued,
        })
    }

    /// Unlock claims older than the staleness window, counting each as a
    /// failed attempt. Returns `(escalated, requeued)`.
    pub async fn escalate_stale(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize), DatabaseError> {
        let stale_window = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        // A window reaching past the calendar leaves nothing stale.
        let cutoff = now
            .checked_sub_signed(stale_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let escalated = self.release_stale(EmailStatus::FailedOnce, cutoff).await?;
        let requeued = self.release_stale(EmailStatus::Empty, cutoff).await?;
        Ok((escalated, requeued))
    }

    async fn release_stale(
        &self,
        from: EmailStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        match from.after_stale_lock() {
            Some(to) => self.store.release_stale_locks(from, to, cutoff).await,
            None => Ok(0),
        }
    }
}
