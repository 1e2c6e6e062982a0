//! Contact directory and matcher backed by a JSON export.
//!
//! The host application exports its applicants, inventory and pre-computed
//! profile matches; stored match history is overlaid on each profile so
//! properties already sent are not offered twice.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MatchingError;
use crate::matching::model::{Contact, Property};
use crate::matching::{ContactDirectory, PropertyMatcher};
use crate::store::MatchHistoryStore;

/// Matched property ids for one profile, best match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMatches {
    pub contact_id: i64,
    pub profile_index: usize,
    pub property_ids: Vec<i64>,
}

/// On-disk export format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub matches: Vec<ProfileMatches>,
}

#[derive(Default)]
pub struct SnapshotDirectory {
    contacts: Vec<Contact>,
    properties: HashMap<i64, Property>,
    matches: HashMap<(i64, usize), Vec<i64>>,
    history: Option<Arc<dyn MatchHistoryStore>>,
}

impl SnapshotDirectory {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            properties: snapshot
                .properties
                .into_iter()
                .map(|p| (p.id, p))
                .collect(),
            matches: snapshot
                .matches
                .into_iter()
                .map(|m| ((m.contact_id, m.profile_index), m.property_ids))
                .collect(),
            contacts: snapshot.contacts,
            history: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, MatchingError> {
        let snapshot: Snapshot =
            serde_json::from_str(json).map_err(|e| MatchingError::Snapshot(e.to_string()))?;
        Ok(Self::new(snapshot))
    }

    pub fn from_path(path: &Path) -> Result<Self, MatchingError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| MatchingError::Snapshot(format!("{}: {e}", path.display())))?;
        let directory = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            contacts = directory.contacts.len(),
            properties = directory.properties.len(),
            "Loaded contact snapshot"
        );
        Ok(directory)
    }

    /// Overlay stored match history on every profile returned.
    pub fn with_history(mut self, history: Arc<dyn MatchHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }
}

#[async_trait]
impl ContactDirectory for SnapshotDirectory {
    async fn applicants(&self) -> Result<Vec<Contact>, MatchingError> {
        let mut contacts: Vec<Contact> = self
            .contacts
            .iter()
            .filter(|c| c.is_applicant())
            .cloned()
            .collect();

        let Some(history) = &self.history else {
            return Ok(contacts);
        };
        for contact in &mut contacts {
            for (index, profile) in contact.profiles.iter_mut().enumerate() {
                let Some(profile) = profile else { continue };
                let stored = history
                    .match_history(contact.id, index)
                    .await
                    .map_err(|e| MatchingError::Directory(e.to_string()))?;
                for (property_id, sent_at) in stored {
                    profile.match_history.entry(property_id).or_insert(sent_at);
                }
            }
        }
        Ok(contacts)
    }
}

#[async_trait]
impl PropertyMatcher for SnapshotDirectory {
    async fn matching_properties(
        &self,
        contact_id: i64,
        profile_index: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<Property>, MatchingError> {
        let Some(ids) = self.matches.get(&(contact_id, profile_index)) else {
            return Ok(Vec::new());
        };
        let mut properties = Vec::with_capacity(ids.len());
        for id in ids {
            match self.properties.get(id) {
                Some(p) if p.added_at >= since => properties.push(p.clone()),
                Some(_) => {}
                None => warn!(contact_id, profile = profile_index, property_id = id, "Matched property missing from snapshot"),
            }
        }
        Ok(properties)
    }
}
