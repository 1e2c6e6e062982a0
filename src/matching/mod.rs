//! Applicant–property matching.
//!
//! The engine walks applicant profiles, asks a [`PropertyMatcher`] for new
//! inventory, drops anything already sent or dismissed, and hands one email
//! per profile to a [`MatchTracker`].

pub mod engine;
pub mod model;
pub mod snapshot;
pub mod tracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MatchingError;

pub use engine::{MatchRunReport, MatchingEngine, property_count};
pub use model::{ApplicantProfile, Contact, ProfileSkip, Property};
pub use snapshot::SnapshotDirectory;
pub use tracker::QueueingMatchTracker;

/// Source of applicant contacts.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn applicants(&self) -> Result<Vec<Contact>, MatchingError>;
}

/// Finds properties matching one profile's criteria.
#[async_trait]
pub trait PropertyMatcher: Send + Sync {
    /// Properties matching `profile_index` of `contact_id`, added at or after `since`.
    async fn matching_properties(
        &self,
        contact_id: i64,
        profile_index: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<Property>, MatchingError>;
}

/// One match email ready to be sent and remembered.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDelivery {
    pub contact_id: i64,
    pub profile_index: usize,
    pub to_address: String,
    /// New property ids, in matched order.
    pub property_ids: Vec<i64>,
    pub sender_name: String,
    pub sender_address: String,
    pub subject: String,
    pub body: String,
}

/// Records sent matches and queues the email.
#[async_trait]
pub trait MatchTracker: Send + Sync {
    async fn record_and_send(&self, delivery: &MatchDelivery) -> Result<(), MatchingError>;
}
