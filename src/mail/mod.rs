//! Outbound mail transport.

pub mod smtp;

use async_trait::async_trait;

use crate::error::DeliveryError;

pub use smtp::{SmtpMailTransport, SmtpSecurity};

/// Content type of every queued notification.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";

/// Transport headers for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailHeaders {
    pub from_name: String,
    pub from_address: String,
    pub content_type: &'static str,
}

impl MailHeaders {
    /// HTML/UTF-8 message from `name <address>`.
    pub fn html(from_name: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            from_name: from_name.into(),
            from_address: from_address.into(),
            content_type: HTML_CONTENT_TYPE,
        }
    }

    /// `From` header value.
    pub fn from_header(&self) -> String {
        if self.from_name.trim().is_empty() {
            format!("<{}>", self.from_address)
        } else {
            format!("{} <{}>", self.from_name, self.from_address)
        }
    }

    /// Raw header lines, in send order.
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("From: {}", self.from_header()),
            format!("Content-Type: {}", self.content_type),
        ]
    }
}

/// A fully rendered message ready for the transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub headers: MailHeaders,
}

/// Delivers one message.
///
/// `Ok(())` means the transport accepted the message. Any error, including a
/// timeout applied by the caller, counts as a failed attempt.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError>;
}
