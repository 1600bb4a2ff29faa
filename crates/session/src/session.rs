//! Session identity and inbound message dispatch.

use std::sync::{Arc, Mutex, PoisonError};

use beam_protocol::{
    FileRequest, InboundMessage, OutboundMessage, RestoredSession, StreamChunkCancel,
    StreamChunkRequest, StreamRequest,
};
use beam_transfer::{
    ByteRange, ControlSink, RegistryError, RegistryEvent, TransferRegistry, UploadState,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::collaborators::{FileCatalog, Notification, Notifier, TransferSettings};
use crate::outbox::Outbox;
use crate::types::{ConnectionState, SessionConfig};

/// One logical conversation with the coordinating server.
///
/// The session key survives transport reconnects; each new connection
/// either restores it or asks for a fresh one. Transfers are never touched
/// by connection changes.
pub struct SessionConnection {
    config: SessionConfig,
    registry: Arc<TransferRegistry>,
    catalog: Arc<dyn FileCatalog>,
    settings: Arc<dyn TransferSettings>,
    notifier: Arc<dyn Notifier>,
    outbox: Outbox,
    session_key: Mutex<Option<String>>,
    state: watch::Sender<ConnectionState>,
}

impl SessionConnection {
    pub fn new(
        config: SessionConfig,
        registry: Arc<TransferRegistry>,
        catalog: Arc<dyn FileCatalog>,
        settings: Arc<dyn TransferSettings>,
        notifier: Arc<dyn Notifier>,
        outbox: Outbox,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            registry,
            catalog,
            settings,
            notifier,
            outbox,
            session_key: Mutex::new(None),
            state,
        }
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    pub fn session_key(&self) -> Option<String> {
        self.session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The first message to write on a fresh connection.
    pub fn handshake(&self) -> OutboundMessage {
        match self.session_key() {
            Some(key) => OutboundMessage::RestoreSession(key),
            None => OutboundMessage::CreateSession,
        }
    }

    pub fn mark_connected(&self) {
        if self.state.send_replace(ConnectionState::Connected) != ConnectionState::Connected {
            info!(session = ?self.session_key(), "session connected");
        }
    }

    /// Records connection loss. In-flight transfers keep running.
    pub fn mark_disconnected(&self) {
        if self.state.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected
        {
            info!(session = ?self.session_key(), "session disconnected");
        }
    }

    /// Decodes and dispatches one text frame. Bad frames are logged and
    /// dropped.
    pub fn handle_text(&self, text: &str) {
        if InboundMessage::exceeds_limit(text) {
            warn!("message too large ({} bytes), dropping", text.len());
            return;
        }
        match InboundMessage::decode(text) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => warn!("failed to decode message: {e}"),
        }
    }

    pub fn dispatch(&self, msg: InboundMessage) {
        match msg {
            InboundMessage::RestoreSession(restored) => self.on_restored(restored),
            InboundMessage::NewSession(key) => self.on_new_session(key),
            InboundMessage::FileRegistrations(ids) => {
                debug!(count = ids.len(), "files registered");
                self.catalog.enable_files(&ids);
            }
            InboundMessage::FileRequest(req) => self.on_file_request(req),
            InboundMessage::DownloadCancelled(download_id) => {
                self.on_download_cancelled(&download_id)
            }
            InboundMessage::StreamRequest(req) => self.on_stream_request(req),
            InboundMessage::StreamChunk(req) => self.on_stream_chunk(req),
            InboundMessage::StreamChunkCancel(req) => self.on_stream_chunk_cancel(req),
            InboundMessage::Unrecognized(msg_type) => {
                warn!(%msg_type, "ignoring unrecognized message");
            }
        }
    }

    /// Pushes a notification for every failed whole-file upload until
    /// `cancel` fires.
    pub async fn report_upload_failures(&self, cancel: CancellationToken) {
        let mut events = self.registry.subscribe();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(RegistryEvent::RecordUpdated {
                    download_id,
                    state: UploadState::Failed,
                    ..
                }) => {
                    let name = self
                        .registry
                        .record(&download_id)
                        .map(|r| r.file_name)
                        .unwrap_or(download_id);
                    self.notify(Notification::error(
                        "Upload failed",
                        format!("{name} could not be sent"),
                    ));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "registry events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    fn adopt_key(&self, key: String) {
        *self
            .session_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(key);
    }

    fn on_restored(&self, restored: RestoredSession) {
        info!(session = %restored.key, files = restored.files.len(), "session restored");
        self.adopt_key(restored.key);
        self.catalog.enable_files(&restored.files);
    }

    fn on_new_session(&self, key: String) {
        info!(session = %key, "new session");
        self.adopt_key(key);

        let files: Vec<_> = self
            .catalog
            .listed_files()
            .iter()
            .map(|f| f.announcement())
            .collect();
        if !files.is_empty() {
            debug!(count = files.len(), "announcing files");
            self.outbox.send(OutboundMessage::RegisterFiles(files));
        }
    }

    fn on_file_request(&self, req: FileRequest) {
        let Some(file) = self.catalog.listed_file(&req.file_id) else {
            warn!(file = %req.file_id, download = %req.download_id, "requested file is no longer listed");
            return;
        };
        let name = file.name.clone();
        let url = self.config.file_url(&req.download_id);
        match self.registry.start_outgoing(&req.download_id, file, &url) {
            Ok(()) => info!(file = %req.file_id, download = %req.download_id, "upload started"),
            Err(RegistryError::DuplicateRecord(_)) => {
                debug!(download = %req.download_id, "duplicate file request ignored");
            }
            Err(e) => {
                warn!(download = %req.download_id, error = %e, "could not start upload");
                self.notify(Notification::error(
                    "Upload failed",
                    format!("{name} could not be sent"),
                ));
            }
        }
    }

    fn on_download_cancelled(&self, download_id: &str) {
        let Some(before) = self.registry.record(download_id) else {
            debug!(download = %download_id, "cancel for unknown download ignored");
            return;
        };
        if let Err(e) = self
            .registry
            .update_record_state(download_id, UploadState::PeerCancelled)
        {
            debug!(download = %download_id, error = %e, "cancel for unknown download ignored");
            return;
        }
        if !before.state.is_cancelled() {
            self.notify(Notification::info(
                "Download cancelled",
                format!("The recipient cancelled {}", before.file_name),
            ));
        }
    }

    fn on_stream_request(&self, req: StreamRequest) {
        let Some(file) = self.catalog.listed_file(&req.file_id) else {
            warn!(file = %req.file_id, stream = %req.stream_key, "stream requested for unlisted file");
            return;
        };
        let require_approval = self.settings.require_manual_start().unwrap_or(false);
        if let Err(e) = self
            .registry
            .open_stream(&req.stream_key, file, require_approval)
        {
            debug!(stream = %req.stream_key, error = %e, "stream request ignored");
        }
    }

    fn on_stream_chunk(&self, req: StreamChunkRequest) {
        let Some(stream) = self.registry.stream(&req.stream_key) else {
            warn!(stream = %req.stream_key, chunk = %req.chunk_id, "chunk requested on unknown stream");
            return;
        };
        let (start, end) = req.range;
        let range = match ByteRange::new(start, end, stream.file().size) {
            Ok(range) => range,
            Err(e) => {
                warn!(stream = %req.stream_key, chunk = %req.chunk_id, error = %e, "invalid chunk range");
                return;
            }
        };
        trace!(stream = %req.stream_key, chunk = %req.chunk_id, %range, "chunk requested");
        let url = self.config.stream_url(&req.chunk_id);
        stream.consume(range, url, req.chunk_id);
    }

    fn on_stream_chunk_cancel(&self, req: StreamChunkCancel) {
        let cancelled = self
            .registry
            .stream(&req.stream_key)
            .is_some_and(|s| s.cancel_chunk(&req.chunk_id));
        if !cancelled {
            debug!(stream = %req.stream_key, chunk = %req.chunk_id, "cancel for unknown chunk ignored");
        }
    }

    fn notify(&self, notification: Notification) {
        if !self.notifier.push(notification) {
            debug!("notification suppressed");
        }
    }
}
