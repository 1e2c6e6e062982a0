//! libSQL backend: async implementation of the storage traits.
//!
//! Supports local file and in-memory databases. Every mutation is one
//! parameterized statement, which SQLite applies atomically.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::email_log::model::{EmailLogRecord, EmailStatus, NewEmail};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{EmailLogStore, MatchHistoryStore, StatusCounts};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical form for every timestamp this backend writes.
///
/// Queries compare through `julianday()`, so rows written by other
/// enqueuers in SQLite's `YYYY-MM-DD HH:MM:SS` form still order correctly.
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ndt.and_utc());
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.and_utc());
    }
    Err(DatabaseError::Serialization(format!(
        "unrecognised timestamp '{s}'"
    )))
}

fn parse_optional_datetime(s: &Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.as_deref()
        .filter(|s| !s.is_empty())
        .map(parse_datetime)
        .transpose()
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an EmailLogRecord.
///
/// Column order matches EMAIL_COLUMNS.
fn row_to_email(row: &libsql::Row) -> Result<EmailLogRecord, DatabaseError> {
    let status_code: String = row
        .get(8)
        .map_err(|e| DatabaseError::Query(format!("email row status: {e}")))?;
    let status = status_code
        .parse::<EmailStatus>()
        .map_err(DatabaseError::Serialization)?;
    let send_at: String = row
        .get(7)
        .map_err(|e| DatabaseError::Query(format!("email row send_at: {e}")))?;
    let locked_at: Option<String> = row.get(10).ok();

    let text = |idx: i32| -> Result<String, DatabaseError> {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Query(format!("email row column {idx}: {e}")))
    };

    Ok(EmailLogRecord {
        id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("email row id: {e}")))?,
        to_address: text(1)?,
        from_address: text(2)?,
        from_name: text(3)?,
        subject: text(4)?,
        body: text(5)?,
        contact_id: row.get::<i64>(6).ok(),
        send_at: parse_datetime(&send_at)?,
        status,
        lock_id: text(9)?,
        locked_at: parse_optional_datetime(&locked_at)?,
    })
}

// ── Trait implementations ───────────────────────────────────────────

const EMAIL_COLUMNS: &str = "email_id, to_email_address, from_email_address, from_name, subject, body, contact_id, send_at, status, lock_id, locked_at";

#[async_trait]
impl EmailLogStore for LibSqlBackend {
    async fn insert_email(
        &self,
        email: &NewEmail,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let send_at = email.send_at.unwrap_or(now);
        let mut rows = conn
            .query(
                "INSERT INTO email_log (to_email_address, from_email_address, from_name, subject, body, contact_id, send_at, status, lock_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '')
                 RETURNING email_id",
                params![
                    email.to_address.as_str(),
                    email.from_address.as_str(),
                    email.from_name.as_str(),
                    email.subject.as_str(),
                    email.body.as_str(),
                    opt_int(email.contact_id),
                    format_datetime(send_at),
                    EmailStatus::Empty.as_code(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_email: {e}")))?;

        let id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("insert_email id: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "insert_email: no id returned".to_string(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("insert_email: {e}"))),
        };

        debug!(email_id = id, to = %email.to_address, "Email queued");
        Ok(id)
    }

    async fn get_email(&self, id: i64) -> Result<Option<EmailLogRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM email_log WHERE email_id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_email(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn release_stale_locks(
        &self,
        from: EmailStatus,
        to: EmailStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "UPDATE email_log SET status = ?1, lock_id = ''
                 WHERE status = ?2 AND lock_id <> '' AND julianday(locked_at) <= julianday(?3)",
                params![to.as_code(), from.as_code(), format_datetime(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_stale_locks: {e}")))?;

        if count > 0 {
            info!(count, from = %from, to = %to, "Released stale email locks");
        }
        Ok(count as usize)
    }

    async fn claim_batch(
        &self,
        lock_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "UPDATE email_log SET lock_id = ?1, locked_at = ?2
                 WHERE lock_id = ''
                   AND email_id IN (
                     SELECT email_id FROM email_log
                     WHERE status IN (?3, ?4) AND lock_id = ''
                       AND julianday(send_at) <= julianday(?2)
                     ORDER BY julianday(send_at), email_id
                     LIMIT ?5
                   )",
                params![
                    lock_id,
                    format_datetime(now),
                    EmailStatus::Empty.as_code(),
                    EmailStatus::FailedOnce.as_code(),
                    limit as i64,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_batch: {e}")))?;

        debug!(lock_id, count, "Claimed email batch");
        Ok(count as usize)
    }

    async fn get_locked(&self, lock_id: &str) -> Result<Vec<EmailLogRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM email_log WHERE lock_id = ?1 ORDER BY email_id"
                ),
                params![lock_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_locked: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(row_to_email(&row)?);
        }
        Ok(records)
    }

    async fn complete_attempt(
        &self,
        id: i64,
        lock_id: &str,
        status: EmailStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let count = conn
            .execute(
                "UPDATE email_log SET status = ?1, lock_id = ''
                 WHERE email_id = ?2 AND lock_id = ?3",
                params![status.as_code(), id, lock_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_attempt: {e}")))?;

        debug!(email_id = id, status = %status, applied = count > 0, "Email attempt recorded");
        Ok(count > 0)
    }

    async fn status_counts(&self) -> Result<StatusCounts, DatabaseError> {
        let conn = self.conn();
        let mut counts = StatusCounts::default();

        let mut rows = conn
            .query(
                "SELECT status, COUNT(*) FROM email_log GROUP BY status",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            let code: String = row.get(0).unwrap_or_default();
            let count: i64 = row.get(1).unwrap_or(0);
            let status = code
                .parse::<EmailStatus>()
                .map_err(DatabaseError::Serialization)?;
            counts.add(status, count as u64);
        }

        let mut rows = conn
            .query("SELECT COUNT(*) FROM email_log WHERE lock_id <> ''", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts locked: {e}")))?;
        if let Ok(Some(row)) = rows.next().await {
            counts.locked = row.get::<i64>(0).unwrap_or(0) as u64;
        }

        Ok(counts)
    }
}

#[async_trait]
impl MatchHistoryStore for LibSqlBackend {
    async fn record_matches(
        &self,
        contact_id: i64,
        profile_index: usize,
        property_ids: &[i64],
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let sent_at = format_datetime(sent_at);
        for property_id in property_ids {
            conn.execute(
                "INSERT OR IGNORE INTO match_history (contact_id, profile_index, property_id, sent_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![contact_id, profile_index as i64, *property_id, sent_at.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_matches: {e}")))?;
        }

        debug!(
            contact_id,
            profile_index,
            count = property_ids.len(),
            "Match history recorded"
        );
        Ok(())
    }

    async fn match_history(
        &self,
        contact_id: i64,
        profile_index: usize,
    ) -> Result<HashMap<i64, DateTime<Utc>>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT property_id, sent_at FROM match_history
                 WHERE contact_id = ?1 AND profile_index = ?2",
                params![contact_id, profile_index as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("match_history: {e}")))?;

        let mut history = HashMap::new();
        while let Ok(Some(row)) = rows.next().await {
            let property_id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("match_history row: {e}")))?;
            let sent_at: String = row.get(1).unwrap_or_default();
            history.insert(property_id, parse_datetime(&sent_at)?);
        }
        Ok(history)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_email(to: &str) -> NewEmail {
        NewEmail::new(to, "Hive Lettings", "office@example.com", "New homes", "Hello")
            .with_contact(7)
    }

    async fn insert_n(db: &LibSqlBackend, n: usize, now: DateTime<Utc>) -> Vec<i64> {
        let mut ids = Vec::new();
        for i in 0..n {
            let id = db
                .insert_email(&make_email(&format!("a{i}@example.com")), now)
                .await
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn insert_and_get() {
        let db = test_db().await;
        let now = Utc::now();
        let id = db.insert_email(&make_email("jo@example.com"), now).await.unwrap();

        let record = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(record.to_address, "jo@example.com");
        assert_eq!(record.from_name, "Hive Lettings");
        assert_eq!(record.contact_id, Some(7));
        assert_eq!(record.status, EmailStatus::Empty);
        assert!(!record.is_locked());
        assert!(record.locked_at.is_none());
        assert_eq!(format_datetime(record.send_at), format_datetime(now));
    }

    #[tokio::test]
    async fn get_not_found() {
        let db = test_db().await;
        assert!(db.get_email(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_without_contact() {
        let db = test_db().await;
        let email = NewEmail::new("x@example.com", "n", "f@example.com", "s", "b");
        let id = db.insert_email(&email, Utc::now()).await.unwrap();
        let record = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(record.contact_id, None);
    }

    #[tokio::test]
    async fn claim_respects_limit() {
        let db = test_db().await;
        let now = Utc::now();
        insert_n(&db, 8, now).await;

        let claimed = db.claim_batch("lock-a", now, 5).await.unwrap();
        assert_eq!(claimed, 5);
        let locked = db.get_locked("lock-a").await.unwrap();
        assert_eq!(locked.len(), 5);
        assert!(locked.iter().all(|r| r.lock_id == "lock-a" && r.locked_at.is_some()));

        let rest = db.claim_batch("lock-b", now, 5).await.unwrap();
        assert_eq!(rest, 3);
    }

    #[tokio::test]
    async fn claim_skips_future_and_terminal() {
        let db = test_db().await;
        let now = Utc::now();
        let later = make_email("later@example.com").send_at(now + Duration::hours(1));
        db.insert_email(&later, now).await.unwrap();

        let ids = insert_n(&db, 2, now).await;
        db.claim_batch("l1", now, 5).await.unwrap();
        db.complete_attempt(ids[0], "l1", EmailStatus::Sent).await.unwrap();
        db.complete_attempt(ids[1], "l1", EmailStatus::FailedTwice)
            .await
            .unwrap();

        assert_eq!(db.claim_batch("l2", now, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn claim_includes_failed_once() {
        let db = test_db().await;
        let now = Utc::now();
        let ids = insert_n(&db, 1, now).await;
        db.claim_batch("l1", now, 5).await.unwrap();
        db.complete_attempt(ids[0], "l1", EmailStatus::FailedOnce)
            .await
            .unwrap();

        assert_eq!(db.claim_batch("l2", now, 5).await.unwrap(), 1);
        let record = db.get_email(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::FailedOnce);
        assert_eq!(record.lock_id, "l2");
    }

    #[tokio::test]
    async fn complete_attempt_requires_matching_lock() {
        let db = test_db().await;
        let now = Utc::now();
        let ids = insert_n(&db, 1, now).await;
        db.claim_batch("mine", now, 5).await.unwrap();

        let applied = db
            .complete_attempt(ids[0], "someone-else", EmailStatus::Sent)
            .await
            .unwrap();
        assert!(!applied);
        let record = db.get_email(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::Empty);
        assert_eq!(record.lock_id, "mine");

        assert!(db.complete_attempt(ids[0], "mine", EmailStatus::Sent).await.unwrap());
        let record = db.get_email(ids[0]).await.unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::Sent);
        assert!(!record.is_locked());
    }

    #[tokio::test]
    async fn release_stale_only_touches_old_locks() {
        let db = test_db().await;
        let now = Utc::now();
        let old = now - Duration::hours(25);
        let ids = insert_n(&db, 2, old).await;

        db.claim_batch("old-lock", old, 1).await.unwrap();
        db.claim_batch("fresh-lock", now, 1).await.unwrap();

        let released = db
            .release_stale_locks(
                EmailStatus::Empty,
                EmailStatus::FailedOnce,
                now - Duration::hours(24),
            )
            .await
            .unwrap();
        assert_eq!(released, 1);

        let first = db.get_email(ids[0]).await.unwrap().unwrap();
        assert_eq!(first.status, EmailStatus::FailedOnce);
        assert!(!first.is_locked());
        let second = db.get_email(ids[1]).await.unwrap().unwrap();
        assert_eq!(second.status, EmailStatus::Empty);
        assert_eq!(second.lock_id, "fresh-lock");
    }

    #[tokio::test]
    async fn counts_by_status() {
        let db = test_db().await;
        let now = Utc::now();
        let ids = insert_n(&db, 4, now).await;
        db.claim_batch("l", now, 2).await.unwrap();
        db.complete_attempt(ids[0], "l", EmailStatus::Sent).await.unwrap();

        let counts = db.status_counts().await.unwrap();
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.empty, 3);
        assert_eq!(counts.locked, 1);
        assert_eq!(counts.total(), 4);
    }

    #[tokio::test]
    async fn match_history_roundtrip() {
        let db = test_db().await;
        let now = Utc::now();
        db.record_matches(3, 0, &[10, 11], now).await.unwrap();
        // Duplicates are ignored.
        db.record_matches(3, 0, &[11], now).await.unwrap();
        db.record_matches(3, 1, &[12], now).await.unwrap();

        let history = db.match_history(3, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.contains_key(&10) && history.contains_key(&11));
        assert!(db.match_history(4, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("notify.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.insert_email(&make_email("a@example.com"), Utc::now())
            .await
            .unwrap();
        assert!(path.exists());
    }

    async fn insert_raw(db: &LibSqlBackend, send_at: &str, lock_id: &str, locked_at: Option<&str>) -> i64 {
        let mut rows = db
            .conn()
            .query(
                "INSERT INTO email_log (to_email_address, from_email_address, from_name, subject, body, send_at, status, lock_id, locked_at)
                 VALUES ('sam@example.com', 'office@example.com', 'Office', 's', 'b', ?1, '', ?2, ?3)
                 RETURNING email_id",
                params![send_at, lock_id, locked_at],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn space_separated_send_at_is_not_claimed_early() {
        let db = test_db().await;
        let id = insert_raw(&db, "2026-05-01 23:00:00", "", None).await;

        let early = db.claim_batch("early", at("2026-05-01T01:00:00Z"), 5).await.unwrap();
        assert_eq!(early, 0);

        let due = db.claim_batch("due", at("2026-05-01T23:00:00Z"), 5).await.unwrap();
        assert_eq!(due, 1);
        let record = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(record.send_at, at("2026-05-01T23:00:00Z"));
        assert_eq!(record.lock_id, "due");
    }

    #[tokio::test]
    async fn space_separated_locked_at_is_compared_as_time() {
        let db = test_db().await;
        let id = insert_raw(&db, "2026-05-01 00:00:00", "crashed", Some("2026-05-01 23:00:00")).await;

        // Cutoff earlier the same day: the claim is still fresh.
        let released = db
            .release_stale_locks(EmailStatus::Empty, EmailStatus::FailedOnce, at("2026-05-01T01:00:00Z"))
            .await
            .unwrap();
        assert_eq!(released, 0);

        let released = db
            .release_stale_locks(EmailStatus::Empty, EmailStatus::FailedOnce, at("2026-05-02T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(released, 1);
        let record = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(record.status, EmailStatus::FailedOnce);
        assert!(!record.is_locked());
    }

    #[tokio::test]
    async fn unparsable_timestamp_is_an_error() {
        let db = test_db().await;
        let id = insert_raw(&db, "next tuesday", "", None).await;

        let err = db.get_email(id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(_)));
        // Never due: julianday() of garbage is NULL.
        assert_eq!(db.claim_batch("l", Utc::now(), 5).await.unwrap(), 0);
    }
}
