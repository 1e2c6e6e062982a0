//! Storage traits for the email log and applicant match history.
//!
//! Every mutating method is a single conditional statement on the backend,
//! so overlapping invocations can never both act on the same row.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::email_log::model::{EmailLogRecord, EmailStatus, NewEmail};
use crate::error::DatabaseError;

/// Number of log rows per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub empty: u64,
    pub failed_once: u64,
    pub failed_twice: u64,
    pub sent: u64,
    /// Rows currently holding a claim, whatever their status.
    pub locked: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.empty + self.failed_once + self.failed_twice + self.sent
    }

    pub(crate) fn add(&mut self, status: EmailStatus, count: u64) {
        match status {
            EmailStatus::Empty => self.empty += count,
            EmailStatus::FailedOnce => self.failed_once += count,
            EmailStatus::FailedTwice => self.failed_twice += count,
            EmailStatus::Sent => self.sent += count,
        }
    }
}

/// Durable table of queued email records. Pure data access, no policy.
#[async_trait]
pub trait EmailLogStore: Send + Sync {
    /// Insert a record with empty status and no lock. Returns the new id.
    async fn insert_email(&self, email: &NewEmail, now: DateTime<Utc>)
    -> Result<i64, DatabaseError>;

    /// Fetch one record by id.
    async fn get_email(&self, id: i64) -> Result<Option<EmailLogRecord>, DatabaseError>;

    /// Unlock every row in `from` whose claim was taken at or before `cutoff`,
    /// moving it to `to`. Returns the number of rows changed.
    async fn release_stale_locks(
        &self,
        from: EmailStatus,
        to: EmailStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    /// Stamp `lock_id` and `locked_at = now` on up to `limit` unlocked,
    /// sendable rows due at or before `now`. Returns the number claimed.
    async fn claim_batch(
        &self,
        lock_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, DatabaseError>;

    /// All rows currently bearing `lock_id`.
    async fn get_locked(&self, lock_id: &str) -> Result<Vec<EmailLogRecord>, DatabaseError>;

    /// Write the post-attempt status and clear the lock in one statement.
    ///
    /// Only applies while the row still bears `lock_id`; returns `false` when
    /// the claim was lost (e.g. released as stale) in the meantime.
    async fn complete_attempt(
        &self,
        id: i64,
        lock_id: &str,
        status: EmailStatus,
    ) -> Result<bool, DatabaseError>;

    /// Row counts per status.
    async fn status_counts(&self) -> Result<StatusCounts, DatabaseError>;
}

/// Per-profile record of property ids already sent to an applicant.
#[async_trait]
pub trait MatchHistoryStore: Send + Sync {
    /// Remember that `property_ids` were sent for this profile.
    async fn record_matches(
        &self,
        contact_id: i64,
        profile_index: usize,
        property_ids: &[i64],
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Property id → time it was first sent, for one profile.
    async fn match_history(
        &self,
        contact_id: i64,
        profile_index: usize,
    ) -> Result<HashMap<i64, DateTime<Utc>>, DatabaseError>;
}
