//! Dispatcher: render, deliver and record each claimed email.
//!
//! Rendering for the whole batch happens before any delivery, so a fatal
//! inlining error aborts the invocation without sending anything. Claims
//! left behind by an aborted run are recovered by stale-lock escalation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::email_log::lock::ClaimedBatch;
use crate::email_log::model::{DeliveryOutcome, EmailLogRecord, NewEmail};
use crate::error::{DatabaseError, DeliveryError, Result};
use crate::mail::{MailHeaders, MailTransport, OutgoingEmail};
use crate::render::MessageComposer;
use crate::store::EmailLogStore;

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Records whose claim was lost before the outcome could be written.
    pub lost_claims: usize,
    /// Records whose outcome could not be persisted.
    pub store_errors: usize,
}

/// Delivers claimed records and owns the enqueue path.
pub struct Dispatcher {
    store: Arc<dyn EmailLogStore>,
    transport: Arc<dyn MailTransport>,
    composer: Arc<MessageComposer>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EmailLogStore>,
        transport: Arc<dyn MailTransport>,
        composer: Arc<MessageComposer>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            composer,
            send_timeout,
        }
    }

    /// Queue a new email. `send_at` defaults to `now`.
    pub async fn enqueue(&self, email: &NewEmail) -> std::result::Result<i64, DatabaseError> {
        self.enqueue_at(email, Utc::now()).await
    }

    pub async fn enqueue_at(
        &self,
        email: &NewEmail,
        now: DateTime<Utc>,
    ) -> std::result::Result<i64, DatabaseError> {
        self.store.insert_email(email, now).await
    }

    /// Attempt each claimed record once and persist its transition.
    ///
    /// Returns `Err` only for rendering failures, which stop the whole run.
    pub async fn dispatch(&self, batch: &ClaimedBatch) -> Result<DispatchReport> {
        let mut prepared = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            let body = self.composer.compose(record).map_err(|e| {
                error!(email_id = record.id, error = %e, "Failed to render email; aborting run");
                e
            })?;
            prepared.push((record, outgoing(record, body)));
        }

        let attempts = prepared
            .iter()
            .map(|(record, email)| self.attempt(&batch.lock_id, record, email));
        let results = join_all(attempts).await;

        let mut report = DispatchReport {
            attempted: results.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                AttemptResult::Recorded(DeliveryOutcome::Delivered) => report.sent += 1,
                AttemptResult::Recorded(DeliveryOutcome::Failed) => report.failed += 1,
                AttemptResult::LostClaim => report.lost_claims += 1,
                AttemptResult::StoreError => report.store_errors += 1,
            }
        }

        if report.attempted > 0 {
            info!(
                lock_id = %batch.lock_id,
                attempted = report.attempted,
                sent = report.sent,
                failed = report.failed,
                "Email batch dispatched"
            );
        }
        Ok(report)
    }

    async fn attempt(
        &self,
        lock_id: &str,
        record: &EmailLogRecord,
        email: &OutgoingEmail,
    ) -> AttemptResult {
        let outcome = match self.deliver(email).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(email_id = record.id, to = %record.to_address, error = %e, "Email delivery failed");
                DeliveryOutcome::Failed
            }
        };

        let Some(next) = record.status.after_attempt(outcome) else {
            // Claim predicate excludes terminal states; release the lock untouched.
            warn!(email_id = record.id, status = %record.status, "Claimed record already terminal");
            return match self.store.complete_attempt(record.id, lock_id, record.status).await {
                Ok(_) => AttemptResult::LostClaim,
                Err(_) => AttemptResult::StoreError,
            };
        };

        match self.store.complete_attempt(record.id, lock_id, next).await {
            Ok(true) => AttemptResult::Recorded(outcome),
            Ok(false) => {
                warn!(email_id = record.id, "Claim lost before outcome was recorded");
                AttemptResult::LostClaim
            }
            Err(e) => {
                error!(email_id = record.id, error = %e, "Failed to record email outcome");
                AttemptResult::StoreError
            }
        }
    }

    /// No answer within `send_timeout` counts as a failure.
    async fn deliver(&self, email: &OutgoingEmail) -> std::result::Result<(), DeliveryError> {
        match tokio::time::timeout(self.send_timeout, self.transport.send(email)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
        }
    }
}

enum AttemptResult {
    Recorded(DeliveryOutcome),
    LostClaim,
    StoreError,
}

fn outgoing(record: &EmailLogRecord, body: String) -> OutgoingEmail {
    OutgoingEmail {
        to: record.to_address.clone(),
        subject: record.subject.clone(),
        body,
        headers: MailHeaders::html(&record.from_name, &record.from_address),
    }
}
