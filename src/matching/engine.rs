//! Matching engine: one pass over every applicant profile.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::MatchConfig;
use crate::error::{Error, Result};
use crate::matching::model::{ApplicantProfile, Contact, ProfileSkip, Property};
use crate::matching::{ContactDirectory, MatchDelivery, MatchTracker, PropertyMatcher};
use crate::render::templates::escape_html;
use crate::render::{ContentRenderer, TemplateKey};

const PROPERTY_COUNT: &str = "[property_count]";
const CONTACT_NAME: &str = "[contact_name]";
const PROPERTIES: &str = "[properties]";

/// Summary of one matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchRunReport {
    /// `false` when matching is switched off and nothing was examined.
    pub enabled: bool,
    pub contacts_scanned: usize,
    pub contacts_skipped: usize,
    pub profiles_skipped: usize,
    pub profiles_matched: usize,
    pub properties_sent: usize,
    pub errors: usize,
}

/// "1 property" / "N properties".
pub fn property_count(n: usize) -> String {
    if n == 1 {
        "1 property".to_string()
    } else {
        format!("{n} properties")
    }
}

pub struct MatchingEngine {
    config: MatchConfig,
    directory: Arc<dyn ContactDirectory>,
    matcher: Arc<dyn PropertyMatcher>,
    tracker: Arc<dyn MatchTracker>,
    renderer: Arc<dyn ContentRenderer>,
}

impl MatchingEngine {
    pub fn new(
        config: MatchConfig,
        directory: Arc<dyn ContactDirectory>,
        matcher: Arc<dyn PropertyMatcher>,
        tracker: Arc<dyn MatchTracker>,
        renderer: Arc<dyn ContentRenderer>,
    ) -> Self {
        Self {
            config,
            directory,
            matcher,
            tracker,
            renderer,
        }
    }

    /// Run one pass.
    ///
    /// Matcher and tracker failures are isolated to their profile. A failing
    /// directory or template aborts the pass.
    pub async fn run(&self) -> Result<MatchRunReport> {
        let Some(since) = self.config.active_since() else {
            debug!("Automatic matching is disabled");
            return Ok(MatchRunReport::default());
        };

        let contacts = self.directory.applicants().await?;
        let mut report = MatchRunReport {
            enabled: true,
            ..Default::default()
        };

        for contact in contacts.iter().filter(|c| c.is_applicant()) {
            report.contacts_scanned += 1;
            if !contact.accepts_email() {
                debug!(contact_id = contact.id, "Contact cannot receive email; skipping");
                report.contacts_skipped += 1;
                continue;
            }

            for (index, slot) in contact.profiles.iter().enumerate() {
                let eligible = slot
                    .as_ref()
                    .ok_or(ProfileSkip::Malformed)
                    .and_then(|p| p.eligibility().map(|()| p));
                let profile = match eligible {
                    Ok(profile) => profile,
                    Err(reason) => {
                        debug!(contact_id = contact.id, profile = index, ?reason, "Skipping profile");
                        report.profiles_skipped += 1;
                        continue;
                    }
                };

                match self.match_profile(contact, index, profile, since).await {
                    Ok(Some(sent)) => {
                        report.profiles_matched += 1;
                        report.properties_sent += sent;
                    }
                    Ok(None) => {}
                    Err(Error::Render(e)) => {
                        error!(contact_id = contact.id, profile = index, error = %e, "Failed to render match email; aborting run");
                        return Err(e.into());
                    }
                    Err(e) => {
                        error!(contact_id = contact.id, profile = index, error = %e, "Profile matching failed");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            contacts = report.contacts_scanned,
            matched = report.profiles_matched,
            properties = report.properties_sent,
            errors = report.errors,
            "Automatic matching complete"
        );
        Ok(report)
    }

    /// Returns the number of properties handed to the tracker, if any.
    async fn match_profile(
        &self,
        contact: &Contact,
        index: usize,
        profile: &ApplicantProfile,
        since: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let matched = self
            .matcher
            .matching_properties(contact.id, index, since)
            .await?;

        let mut fresh: Vec<&Property> = Vec::with_capacity(matched.len());
        for property in &matched {
            if profile.match_history.contains_key(&property.id)
                || contact.dismissed_properties.contains(&property.id)
                || fresh.iter().any(|p| p.id == property.id)
            {
                continue;
            }
            fresh.push(property);
        }
        if fresh.is_empty() {
            debug!(contact_id = contact.id, profile = index, "No new matches");
            return Ok(None);
        }

        let count = property_count(fresh.len());
        let subject = self.config.default_subject.replace(PROPERTY_COUNT, &count);
        let mut body = self
            .config
            .default_body
            .replace(CONTACT_NAME, &escape_html(&contact.name))
            .replace(PROPERTY_COUNT, &count);
        if body.contains(PROPERTIES) {
            let mut fragments = String::new();
            for property in &fresh {
                fragments.push_str(
                    &self
                        .renderer
                        .render(TemplateKey::Property, &property.template_vars())?,
                );
            }
            body = body.replace(PROPERTIES, &fragments);
        }

        let delivery = MatchDelivery {
            contact_id: contact.id,
            profile_index: index,
            to_address: contact.email_address.clone(),
            property_ids: fresh.iter().map(|p| p.id).collect(),
            sender_name: self.config.sender_name.clone(),
            sender_address: self.config.sender_address.clone(),
            subject,
            body,
        };
        self.tracker.record_and_send(&delivery).await?;

        info!(
            contact_id = contact.id,
            profile = index,
            properties = delivery.property_ids.len(),
            "Queued match email"
        );
        Ok(Some(delivery.property_ids.len()))
    }
}
