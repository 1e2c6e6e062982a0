//! Property Notify: email delivery queue and applicant matching.

pub mod config;
pub mod email_log;
pub mod error;
pub mod mail;
pub mod matching;
pub mod render;
pub mod scheduler;
pub mod service;
pub mod store;
