//! Shared wiring for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use property_notify::config::MatchConfig;
use property_notify::email_log::{Dispatcher, LockManager, NewEmail};
use property_notify::error::DeliveryError;
use property_notify::mail::{MailTransport, OutgoingEmail};
use property_notify::matching::{MatchingEngine, QueueingMatchTracker, SnapshotDirectory};
use property_notify::render::{MessageComposer, StyleInliner, TemplateRenderer};
use property_notify::service::NotificationService;
use property_notify::store::LibSqlBackend;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const SITE_URL: &str = "https://homes.example.com";

/// Transport that answers from a script, then falls back to `default_ok`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<bool>>,
    default_ok: bool,
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

impl ScriptedTransport {
    pub fn always(ok: bool) -> Arc<Self> {
        Self::scripted(&[], ok)
    }

    pub fn scripted(script: &[bool], default_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            default_ok,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|e| e.to.clone()).collect()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(email.clone());
        let ok = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_ok);
        if ok {
            Ok(())
        } else {
            Err(DeliveryError::Smtp("421 service not available".into()))
        }
    }
}

pub struct Harness {
    pub db: Arc<LibSqlBackend>,
    pub transport: Arc<ScriptedTransport>,
    pub service: NotificationService,
}

pub async fn harness(transport: Arc<ScriptedTransport>) -> Harness {
    harness_with_matching(transport, MatchConfig::default(), SnapshotDirectory::default()).await
}

pub async fn harness_with_matching(
    transport: Arc<ScriptedTransport>,
    config: MatchConfig,
    directory: SnapshotDirectory,
) -> Harness {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let renderer = Arc::new(TemplateRenderer::new());
    let composer = Arc::new(MessageComposer::new(
        renderer.clone(),
        Arc::new(StyleInliner),
        config.site_url.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        transport.clone(),
        composer,
        Duration::from_secs(5),
    ));
    let lock = LockManager::new(db.clone(), 5, DAY);

    let directory = Arc::new(directory.with_history(db.clone()));
    let tracker = Arc::new(QueueingMatchTracker::new(dispatcher.clone(), db.clone()));
    let matching = MatchingEngine::new(config, directory.clone(), directory, tracker, renderer);

    Harness {
        db: db.clone(),
        transport,
        service: NotificationService::new(db, lock, dispatcher, matching),
    }
}

pub fn email(to: &str) -> NewEmail {
    NewEmail::new(to, "Hive Lettings", "office@example.com", "New homes", "Hello").with_contact(7)
}
