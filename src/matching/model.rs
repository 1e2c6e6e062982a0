//! Applicant, profile and property types consumed by the matching engine.
//!
//! All of these are owned by the host application; the engine only reads them.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::render::TemplateVars;

/// Contact type that receives automatic matches.
pub const APPLICANT: &str = "applicant";

/// Contact method that, when forbidden, suppresses all emails.
pub const EMAIL_METHOD: &str = "email";

/// A registrant known to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub contact_types: Vec<String>,
    #[serde(default)]
    pub forbidden_contact_methods: Vec<String>,
    /// Properties the contact marked "not interested", across all profiles.
    #[serde(default)]
    pub dismissed_properties: HashSet<i64>,
    /// Ordered applicant profiles. `None` marks an empty or malformed slot.
    #[serde(default, deserialize_with = "lenient_profiles")]
    pub profiles: Vec<Option<ApplicantProfile>>,
}

impl Contact {
    pub fn is_applicant(&self) -> bool {
        self.contact_types.iter().any(|t| t == APPLICANT)
    }

    /// Syntactically plausible address and email not forbidden.
    pub fn accepts_email(&self) -> bool {
        self.email_address.contains('@')
            && !self
                .forbidden_contact_methods
                .iter()
                .any(|m| m == EMAIL_METHOD)
    }
}

/// One saved search belonging to an applicant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub department: Option<String>,
    /// `Some(false)` means the applicant opted out of match emails.
    /// Accepts a bool or the host's string form, where `""` is off.
    #[serde(default, deserialize_with = "opt_in_flag")]
    pub send_matching_properties: Option<bool>,
    /// Accepts a bool or the host's string form, where `"yes"` is on.
    #[serde(default, deserialize_with = "opt_out_flag")]
    pub auto_match_disabled: bool,
    /// Search criteria, interpreted only by the property matcher.
    #[serde(default)]
    pub criteria: serde_json::Map<String, serde_json::Value>,
    /// Property id → when it was sent for this profile.
    #[serde(default)]
    pub match_history: HashMap<i64, DateTime<Utc>>,
}

/// Why a profile was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSkip {
    Malformed,
    NoDepartment,
    OptedOut,
    AutoMatchDisabled,
}

impl ApplicantProfile {
    /// Check the per-profile preconditions for automatic matching.
    pub fn eligibility(&self) -> Result<(), ProfileSkip> {
        if self
            .department
            .as_deref()
            .is_none_or(|d| d.trim().is_empty())
        {
            return Err(ProfileSkip::NoDepartment);
        }
        if self.send_matching_properties == Some(false) {
            return Err(ProfileSkip::OptedOut);
        }
        if self.auto_match_disabled {
            return Err(ProfileSkip::AutoMatchDisabled);
        }
        Ok(())
    }
}

/// An inventory item that can be matched to applicants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub url: String,
    pub added_at: DateTime<Utc>,
}

impl Property {
    /// Variables for the per-property email fragment.
    pub fn template_vars(&self) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("id".into(), self.id.to_string());
        vars.insert("title".into(), self.title.clone());
        vars.insert("price".into(), self.price.clone());
        vars.insert("department".into(), self.department.clone());
        vars.insert("url".into(), self.url.clone());
        vars
    }
}

/// A profile flag as exported: a JSON bool or a free-text value.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn opt_in_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Flag>::deserialize(deserializer)?.map(|flag| match flag {
        Flag::Bool(on) => on,
        Flag::Text(text) => !matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "" | "no" | "false" | "0"
        ),
    }))
}

fn opt_out_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(on)) => on,
        Some(Flag::Text(text)) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "yes" | "true" | "1"
        ),
        None => false,
    })
}

/// Keep each profile slot even if it fails to parse.
fn lenient_profiles<'de, D>(deserializer: D) -> Result<Vec<Option<ApplicantProfile>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|value| match value {
            serde_json::Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email: &str, forbidden: &[&str]) -> Contact {
        Contact {
            id: 1,
            name: "Sam Reed".into(),
            email_address: email.into(),
            contact_types: vec![APPLICANT.into()],
            forbidden_contact_methods: forbidden.iter().map(|s| s.to_string()).collect(),
            dismissed_properties: HashSet::new(),
            profiles: Vec::new(),
        }
    }

    #[test]
    fn email_acceptance() {
        assert!(contact("sam@example.com", &[]).accepts_email());
        assert!(contact("sam@example.com", &["phone"]).accepts_email());
        assert!(!contact("sam.example.com", &[]).accepts_email());
        assert!(!contact("", &[]).accepts_email());
        assert!(!contact("sam@example.com", &["email"]).accepts_email());
    }

    #[test]
    fn profile_eligibility() {
        let ok = ApplicantProfile {
            department: Some("residential-lettings".into()),
            ..Default::default()
        };
        assert_eq!(ok.eligibility(), Ok(()));

        assert_eq!(
            ApplicantProfile::default().eligibility(),
            Err(ProfileSkip::NoDepartment)
        );
        let opted_out = ApplicantProfile {
            send_matching_properties: Some(false),
            ..ok.clone()
        };
        assert_eq!(opted_out.eligibility(), Err(ProfileSkip::OptedOut));
        let disabled = ApplicantProfile {
            auto_match_disabled: true,
            ..ok.clone()
        };
        assert_eq!(disabled.eligibility(), Err(ProfileSkip::AutoMatchDisabled));

        let blank_department = ApplicantProfile {
            department: Some("  ".into()),
            ..ok.clone()
        };
        assert_eq!(blank_department.eligibility(), Err(ProfileSkip::NoDepartment));
    }

    fn parse_profile(flags: &str) -> ApplicantProfile {
        let json = format!(r#"{{"department": "residential-lettings"{flags}}}"#);
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn flags_accept_string_forms() {
        let opted_in = parse_profile(r#", "send_matching_properties": "yes", "auto_match_disabled": """#);
        assert_eq!(opted_in.send_matching_properties, Some(true));
        assert!(!opted_in.auto_match_disabled);
        assert_eq!(opted_in.eligibility(), Ok(()));

        let opted_out = parse_profile(r#", "send_matching_properties": """#);
        assert_eq!(opted_out.send_matching_properties, Some(false));
        assert_eq!(opted_out.eligibility(), Err(ProfileSkip::OptedOut));

        let disabled = parse_profile(r#", "auto_match_disabled": "yes""#);
        assert!(disabled.auto_match_disabled);
        assert_eq!(disabled.eligibility(), Err(ProfileSkip::AutoMatchDisabled));

        let unset = parse_profile(r#", "send_matching_properties": null"#);
        assert_eq!(unset.send_matching_properties, None);
        assert_eq!(unset.eligibility(), Ok(()));
    }

    #[test]
    fn flags_accept_bools() {
        let profile = parse_profile(r#", "send_matching_properties": false, "auto_match_disabled": true"#);
        assert_eq!(profile.send_matching_properties, Some(false));
        assert!(profile.auto_match_disabled);
    }

    #[test]
    fn string_flags_keep_profile_slot() {
        let json = r#"{
            "id": 3,
            "email_address": "sam@example.com",
            "contact_types": ["applicant"],
            "profiles": [
                {"department": "residential-lettings", "send_matching_properties": "yes", "auto_match_disabled": ""}
            ]
        }"#;
        let contact: Contact = serde_json::from_str(json).unwrap();
        let profile = contact.profiles[0].as_ref().unwrap();
        assert_eq!(profile.eligibility(), Ok(()));
    }

    #[test]
    fn malformed_profiles_keep_their_slot() {
        let json = r#"{
            "id": 3,
            "name": "Sam",
            "email_address": "sam@example.com",
            "contact_types": ["applicant"],
            "profiles": [
                {"department": "residential-sales", "match_history": {"12": "2026-01-01T00:00:00Z"}},
                "",
                {"department": 5},
                {"department": "commercial"}
            ]
        }"#;
        let contact: Contact = serde_json::from_str(json).unwrap();
        assert_eq!(contact.profiles.len(), 4);
        assert!(contact.profiles[0].as_ref().unwrap().match_history.contains_key(&12));
        assert!(contact.profiles[1].is_none());
        assert!(contact.profiles[2].is_none());
        assert!(contact.profiles[3].is_some());
    }
}
