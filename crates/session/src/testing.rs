//! Hand-written collaborators for session tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use beam_protocol::OutboundMessage;
use beam_transfer::{
    ByteRange, ChunkTransferEngine, LocalFile, StreamLimits, TransferHandle, TransferRegistry,
    TransferReporter,
};
use tokio::sync::mpsc;

use crate::collaborators::{FileCatalog, Notification, Notifier, TransferSettings};
use crate::outbox::Outbox;
use crate::session::SessionConnection;
use crate::types::SessionConfig;

pub fn sample_file(id: &str, size: u64) -> LocalFile {
    LocalFile {
        id: id.into(),
        name: format!("{id}.bin"),
        path: format!("/srv/{id}.bin").into(),
        size,
        mime: "application/octet-stream".into(),
    }
}

/// Lets spawned watchers run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[derive(Default)]
pub struct MockCatalog {
    files: Mutex<Vec<LocalFile>>,
    enabled: Mutex<Vec<String>>,
}

impl MockCatalog {
    pub fn add(&self, file: LocalFile) {
        self.files.lock().unwrap().push(file);
    }

    pub fn enabled(&self) -> Vec<String> {
        self.enabled.lock().unwrap().clone()
    }
}

impl FileCatalog for MockCatalog {
    fn listed_file(&self, file_id: &str) -> Option<LocalFile> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == file_id)
            .cloned()
    }

    fn listed_files(&self) -> Vec<LocalFile> {
        self.files.lock().unwrap().clone()
    }

    fn enable_files(&self, file_ids: &[String]) {
        self.enabled.lock().unwrap().extend_from_slice(file_ids);
    }
}

#[derive(Default)]
pub struct MockSettings {
    manual_start: Mutex<Option<bool>>,
}

impl MockSettings {
    pub fn set(&self, value: Option<bool>) {
        *self.manual_start.lock().unwrap() = value;
    }
}

impl TransferSettings for MockSettings {
    fn require_manual_start(&self) -> Option<bool> {
        *self.manual_start.lock().unwrap()
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pushed: Mutex<Vec<Notification>>,
}

impl MockNotifier {
    pub fn pushed(&self) -> Vec<Notification> {
        self.pushed.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    fn push(&self, notification: Notification) -> bool {
        self.pushed.lock().unwrap().push(notification);
        true
    }
}

#[derive(Default)]
pub struct MockEngine {
    transfers: Mutex<Vec<(ByteRange, String, TransferHandle, TransferReporter)>>,
}

impl MockEngine {
    pub fn calls(&self) -> Vec<(ByteRange, String)> {
        self.transfers
            .lock()
            .unwrap()
            .iter()
            .map(|(r, u, _, _)| (*r, u.clone()))
            .collect()
    }

    pub fn handles(&self) -> Vec<TransferHandle> {
        self.transfers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, h, _)| h.clone())
            .collect()
    }

    pub fn reporters(&self) -> Vec<TransferReporter> {
        self.transfers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, _, r)| r.clone())
            .collect()
    }
}

impl ChunkTransferEngine for MockEngine {
    fn transfer(&self, range: ByteRange, url: &str, _file: &LocalFile) -> TransferHandle {
        let (handle, reporter) = TransferHandle::new(range.len());
        self.transfers
            .lock()
            .unwrap()
            .push((range, url.to_string(), handle.clone(), reporter));
        handle
    }
}

/// A session wired to mocks.
pub struct Fixture {
    pub session: Arc<SessionConnection>,
    pub registry: Arc<TransferRegistry>,
    pub catalog: Arc<MockCatalog>,
    pub settings: Arc<MockSettings>,
    pub notifier: Arc<MockNotifier>,
    pub engine: Arc<MockEngine>,
    pub outbound: mpsc::Receiver<OutboundMessage>,
}

impl Fixture {
    pub fn new() -> Self {
        let (outbox, outbound) = Outbox::channel(64);
        let engine = Arc::new(MockEngine::default());
        let registry = Arc::new(TransferRegistry::new(
            engine.clone(),
            Arc::new(outbox.clone()),
            StreamLimits::default(),
        ));
        let catalog = Arc::new(MockCatalog::default());
        let settings = Arc::new(MockSettings::default());
        let notifier = Arc::new(MockNotifier::default());
        let session = Arc::new(SessionConnection::new(
            SessionConfig::new("https://api.test"),
            Arc::clone(&registry),
            catalog.clone(),
            settings.clone(),
            notifier.clone(),
            outbox,
        ));
        Self {
            session,
            registry,
            catalog,
            settings,
            notifier,
            engine,
            outbound,
        }
    }
}
