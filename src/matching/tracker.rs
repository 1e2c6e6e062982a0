//! Tracker that queues match emails on the email log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::email_log::{Dispatcher, NewEmail};
use crate::error::MatchingError;
use crate::matching::{MatchDelivery, MatchTracker};
use crate::store::MatchHistoryStore;

/// Enqueues one log record per delivery and remembers the ids it carried.
///
/// The email is queued before history is written: if the history write
/// fails the same properties may be offered again next run, never lost.
pub struct QueueingMatchTracker {
    dispatcher: Arc<Dispatcher>,
    history: Arc<dyn MatchHistoryStore>,
}

impl QueueingMatchTracker {
    pub fn new(dispatcher: Arc<Dispatcher>, history: Arc<dyn MatchHistoryStore>) -> Self {
        Self {
            dispatcher,
            history,
        }
    }
}

#[async_trait]
impl MatchTracker for QueueingMatchTracker {
    async fn record_and_send(&self, delivery: &MatchDelivery) -> Result<(), MatchingError> {
        let tracker_error = |e: crate::error::DatabaseError| MatchingError::Tracker {
            contact_id: delivery.contact_id,
            reason: e.to_string(),
        };

        let email = NewEmail::new(
            delivery.to_address.clone(),
            delivery.sender_name.clone(),
            delivery.sender_address.clone(),
            delivery.subject.clone(),
            delivery.body.clone(),
        )
        .with_contact(delivery.contact_id);
        let email_id = self
            .dispatcher
            .enqueue(&email)
            .await
            .map_err(tracker_error)?;

        self.history
            .record_matches(
                delivery.contact_id,
                delivery.profile_index,
                &delivery.property_ids,
                Utc::now(),
            )
            .await
            .map_err(tracker_error)?;

        debug!(
            email_id,
            contact_id = delivery.contact_id,
            profile = delivery.profile_index,
            "Match email queued"
        );
        Ok(())
    }
}
