//! SMTP transport via lettre.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::DeliveryError;
use crate::mail::{MailTransport, OutgoingEmail};

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// Implicit TLS (usually port 465).
    Tls,
    /// STARTTLS upgrade (usually port 587).
    #[default]
    StartTls,
    /// Plain connection, for local relays and test servers.
    None,
}

impl std::str::FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls" | "ssl" => Ok(SmtpSecurity::Tls),
            "starttls" => Ok(SmtpSecurity::StartTls),
            "none" | "plain" => Ok(SmtpSecurity::None),
            other => Err(format!("unknown SMTP security mode: {other}")),
        }
    }
}

/// Blocking lettre transport, driven from `spawn_blocking`.
pub struct SmtpMailTransport {
    transport: Arc<SmtpTransport>,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let builder = match config.security {
            SmtpSecurity::Tls => SmtpTransport::relay(&config.host),
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(&config.host),
            SmtpSecurity::None => Ok(SmtpTransport::builder_dangerous(&config.host)),
        }
        .map_err(|e| DeliveryError::Smtp(format!("SMTP relay error: {e}")))?;

        let mut builder = builder
            .port(config.port)
            .timeout(Some(config.timeout));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: Arc::new(builder.build()),
        })
    }
}

/// Build the lettre message for one outgoing email.
pub fn build_message(email: &OutgoingEmail) -> Result<Message, DeliveryError> {
    let from_address: Address =
        email
            .headers
            .from_address
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress {
                address: email.headers.from_address.clone(),
                reason: format!("{e}"),
            })?;
    let from_name = Some(email.headers.from_name.trim().to_string()).filter(|n| !n.is_empty());

    let to: Mailbox = email.to.parse().map_err(|e| DeliveryError::InvalidAddress {
        address: email.to.clone(),
        reason: format!("{e}"),
    })?;

    Message::builder()
        .from(Mailbox::new(from_name, from_address))
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.body.clone())
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let message = build_message(email)?;
        let transport = Arc::clone(&self.transport);

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DeliveryError::Join(e.to_string()))?
            .map_err(|e| DeliveryError::Smtp(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %email.to, "Email sent");
        Ok(())
    }
}

/// Default timeout applied to SMTP commands.
pub const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(30);
