//! Email log record and its delivery status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a queued email.
///
/// Stored as a short code: `''`, `fail1`, `fail2`, `sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    /// Never attempted.
    #[default]
    Empty,
    /// One failed attempt (or one stale lock). Eligible for a retry.
    FailedOnce,
    /// Dead-letter. No further attempts are made.
    FailedTwice,
    /// Delivered.
    Sent,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl EmailStatus {
    /// Every status, in severity order.
    pub const ALL: [EmailStatus; 4] = [
        EmailStatus::Empty,
        EmailStatus::FailedOnce,
        EmailStatus::FailedTwice,
        EmailStatus::Sent,
    ];

    /// The code stored in the `status` column.
    pub fn as_code(&self) -> &'static str {
        match self {
            EmailStatus::Empty => "",
            EmailStatus::FailedOnce => "fail1",
            EmailStatus::FailedTwice => "fail2",
            EmailStatus::Sent => "sent",
        }
    }

    /// Terminal states never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EmailStatus::FailedTwice | EmailStatus::Sent)
    }

    /// Whether a record in this status may be claimed for sending.
    pub fn is_sendable(&self) -> bool {
        matches!(self, EmailStatus::Empty | EmailStatus::FailedOnce)
    }

    /// Status after a delivery attempt.
    ///
    /// Returns `None` for terminal states; they are never claimed, so a
    /// transition request for them is a caller bug.
    pub fn after_attempt(self, outcome: DeliveryOutcome) -> Option<EmailStatus> {
        match (self, outcome) {
            (EmailStatus::Empty | EmailStatus::FailedOnce, DeliveryOutcome::Delivered) => {
                Some(EmailStatus::Sent)
            }
            (EmailStatus::Empty, DeliveryOutcome::Failed) => Some(EmailStatus::FailedOnce),
            (EmailStatus::FailedOnce, DeliveryOutcome::Failed) => Some(EmailStatus::FailedTwice),
            (EmailStatus::FailedTwice | EmailStatus::Sent, _) => None,
        }
    }

    /// Status after a claim was found abandoned past the staleness window.
    ///
    /// A crashed worker counts as one failed attempt.
    pub fn after_stale_lock(self) -> Option<EmailStatus> {
        self.after_attempt(DeliveryOutcome::Failed)
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EmailStatus::Empty => "empty",
            EmailStatus::FailedOnce => "failed-once",
            EmailStatus::FailedTwice => "failed-twice",
            EmailStatus::Sent => "sent",
        };
        f.write_str(label)
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    /// Accepts both the stored code and the display label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "empty" => Ok(EmailStatus::Empty),
            "fail1" | "failed-once" => Ok(EmailStatus::FailedOnce),
            "fail2" | "failed-twice" => Ok(EmailStatus::FailedTwice),
            "sent" => Ok(EmailStatus::Sent),
            other => Err(format!("unknown email status: {other:?}")),
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailLogRecord {
    pub id: i64,
    pub to_address: String,
    pub from_address: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
    pub contact_id: Option<i64>,
    pub send_at: DateTime<Utc>,
    pub status: EmailStatus,
    /// Empty when unclaimed.
    pub lock_id: String,
    pub locked_at: Option<DateTime<Utc>>,
}

impl EmailLogRecord {
    pub fn is_locked(&self) -> bool {
        !self.lock_id.is_empty()
    }
}

/// Insert request for the enqueue path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmail {
    pub to_address: String,
    pub from_address: String,
    pub from_name: String,
    pub subject: String,
    pub body: String,
    pub contact_id: Option<i64>,
    /// Defaults to "now" at insert time.
    pub send_at: Option<DateTime<Utc>>,
}

impl NewEmail {
    pub fn new(
        to_address: impl Into<String>,
        from_name: impl Into<String>,
        from_address: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to_address: to_address.into(),
            from_address: from_address.into(),
            from_name: from_name.into(),
            subject: subject.into(),
            body: body.into(),
            contact_id: None,
            send_at: None,
        }
    }

    pub fn with_contact(mut self, contact_id: i64) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    pub fn send_at(mut self, at: DateTime<Utc>) -> Self {
        self.send_at = Some(at);
        self
    }
}
