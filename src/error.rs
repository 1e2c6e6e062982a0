//! Error types for the notification subsystem.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Matching error: {0}")]
    Matching(#[from] MatchingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail transport errors.
///
/// The dispatcher never propagates these; they feed the retry state machine.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Transport gave no answer within {0:?}")]
    Timeout(Duration),

    #[error("Transport task failed: {0}")]
    Join(String),
}

/// Rendering and CSS inlining errors. Always fatal to the current invocation.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Template {key} not found")]
    TemplateNotFound { key: String },

    #[error("Failed to inline CSS styles: {0}")]
    Inline(String),

    #[error("IO error reading template: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by matching collaborators.
#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("Property matcher failed for contact {contact_id} profile {profile_index}: {reason}")]
    Matcher {
        contact_id: i64,
        profile_index: usize,
        reason: String,
    },

    #[error("Contact directory unavailable: {0}")]
    Directory(String),

    #[error("Failed to record and send for contact {contact_id}: {reason}")]
    Tracker { contact_id: i64, reason: String },

    #[error("Invalid snapshot: {0}")]
    Snapshot(String),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
