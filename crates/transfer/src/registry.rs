use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use beam_protocol::OutboundMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::engine::ChunkTransferEngine;
use crate::handle::{TransferHandle, TransferSnapshot, TransferState};
use crate::stream::{StreamStatus, TransferStream};
use crate::types::{ByteRange, LocalFile, StreamState, UploadState};
use crate::{ControlSink, RegistryError, StreamLimits};

const EVENT_CAPACITY: usize = 256;

/// Change notifications published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    StreamOpened {
        stream_key: String,
        file_id: String,
        state: StreamState,
    },
    StreamStateChanged {
        stream_key: String,
        state: StreamState,
    },
    StreamRemoved {
        stream_key: String,
    },
    RecordRegistered {
        download_id: String,
        file_id: String,
    },
    RecordUpdated {
        download_id: String,
        state: UploadState,
        progress: f64,
    },
    RecordRemoved {
        download_id: String,
    },
}

/// Read-only view of an outgoing whole-file upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSnapshot {
    pub download_id: String,
    pub file_id: String,
    pub file_name: String,
    pub state: UploadState,
    pub progress: f64,
    pub bytes_transferred: u64,
    pub registered_at: DateTime<Utc>,
}

struct UploadRecord {
    download_id: String,
    file: LocalFile,
    state: UploadState,
    progress: f64,
    handle: TransferHandle,
    registered_at: DateTime<Utc>,
    seq: u64,
}

impl UploadRecord {
    fn recompute_progress(&mut self) {
        self.progress = if self.file.size == 0 {
            if self.state == UploadState::Finished { 1.0 } else { 0.0 }
        } else {
            let loaded = self.handle.snapshot().loaded;
            (loaded as f64 / self.file.size as f64).min(1.0)
        };
    }

    fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            download_id: self.download_id.clone(),
            file_id: self.file.id.clone(),
            file_name: self.file.name.clone(),
            state: self.state,
            progress: self.progress,
            bytes_transferred: self.handle.snapshot().loaded,
            registered_at: self.registered_at,
        }
    }
}

#[derive(Default)]
struct StreamIndex {
    by_key: HashMap<String, TransferStream>,
    by_file: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct RecordTable {
    by_id: HashMap<String, UploadRecord>,
    next_seq: u64,
}

/// Owns every range-request stream and outgoing upload of a session.
pub struct TransferRegistry {
    engine: Arc<dyn ChunkTransferEngine>,
    sink: Arc<dyn ControlSink>,
    limits: StreamLimits,
    streams: RwLock<StreamIndex>,
    records: Mutex<RecordTable>,
    events: broadcast::Sender<RegistryEvent>,
}

impl TransferRegistry {
    pub fn new(
        engine: Arc<dyn ChunkTransferEngine>,
        sink: Arc<dyn ControlSink>,
        limits: StreamLimits,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            sink,
            limits,
            streams: RwLock::new(StreamIndex::default()),
            records: Mutex::new(RecordTable::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    /// Creates and registers a stream for `file`.
    pub fn open_stream(
        &self,
        stream_key: &str,
        file: LocalFile,
        require_approval: bool,
    ) -> Result<TransferStream, RegistryError> {
        let mut index = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        if index.by_key.contains_key(stream_key) {
            return Err(RegistryError::DuplicateStream(stream_key.to_string()));
        }

        let file_id = file.id.clone();
        let stream = TransferStream::new(
            stream_key,
            file,
            Arc::clone(&self.engine),
            Arc::clone(&self.sink),
            self.limits,
            require_approval,
        );
        index
            .by_key
            .insert(stream_key.to_string(), stream.clone());
        index
            .by_file
            .entry(file_id.clone())
            .or_default()
            .push(stream_key.to_string());
        drop(index);

        let status = stream.subscribe();
        let state = status.borrow().state;
        info!(stream = %stream_key, file = %file_id, %state, "stream opened");
        tokio::spawn(forward_stream_states(
            stream_key.to_string(),
            state,
            status,
            self.events.clone(),
        ));
        let _ = self.events.send(RegistryEvent::StreamOpened {
            stream_key: stream_key.to_string(),
            file_id,
            state,
        });
        Ok(stream)
    }

    pub fn stream(&self, stream_key: &str) -> Option<TransferStream> {
        let index = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        index.by_key.get(stream_key).cloned()
    }

    pub fn streams_for_file(&self, file_id: &str) -> Vec<TransferStream> {
        let index = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        index
            .by_file
            .get(file_id)
            .into_iter()
            .flatten()
            .filter_map(|key| index.by_key.get(key).cloned())
            .collect()
    }

    /// Number of streams that have not been cancelled.
    pub fn active_stream_count(&self) -> usize {
        let index = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        index
            .by_key
            .values()
            .filter(|s| s.state() != StreamState::Cancelled)
            .count()
    }

    /// Cancels a stream and forgets it.
    pub fn remove_stream(&self, stream_key: &str) -> Option<TransferStream> {
        let mut index = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let stream = index.by_key.remove(stream_key)?;
        let file_id = &stream.file().id;
        if let Some(keys) = index.by_file.get_mut(file_id) {
            keys.retain(|k| k != stream_key);
            if keys.is_empty() {
                index.by_file.remove(file_id);
            }
        }
        drop(index);

        stream.request(StreamState::Cancelled);
        debug!(stream = %stream_key, "stream removed");
        let _ = self.events.send(RegistryEvent::StreamRemoved {
            stream_key: stream_key.to_string(),
        });
        Some(stream)
    }

    // -----------------------------------------------------------------------
    // Whole-file uploads
    // -----------------------------------------------------------------------

    /// Starts sending the whole of `file` to `url` and tracks it.
    pub fn start_outgoing(
        self: &Arc<Self>,
        download_id: &str,
        file: LocalFile,
        url: &str,
    ) -> Result<(), RegistryError> {
        if self.lock_records().by_id.contains_key(download_id) {
            return Err(RegistryError::DuplicateRecord(download_id.to_string()));
        }
        let handle = self
            .engine
            .transfer(ByteRange::whole(file.size), url, &file);
        self.register_outgoing(download_id, file, handle)
    }

    /// Tracks an already-started upload and mirrors its progress.
    pub fn register_outgoing(
        self: &Arc<Self>,
        download_id: &str,
        file: LocalFile,
        handle: TransferHandle,
    ) -> Result<(), RegistryError> {
        let mut records = self.lock_records();
        if records.by_id.contains_key(download_id) {
            return Err(RegistryError::DuplicateRecord(download_id.to_string()));
        }

        let file_id = file.id.clone();
        let updates = handle.subscribe();
        let seq = records.next_seq;
        records.next_seq += 1;
        records.by_id.insert(
            download_id.to_string(),
            UploadRecord {
                download_id: download_id.to_string(),
                file,
                state: UploadState::Pending,
                progress: 0.0,
                handle,
                registered_at: Utc::now(),
                seq,
            },
        );
        drop(records);

        info!(download = %download_id, file = %file_id, "upload registered");
        let _ = self.events.send(RegistryEvent::RecordRegistered {
            download_id: download_id.to_string(),
            file_id,
        });
        tokio::spawn(watch_record(
            Arc::downgrade(self),
            download_id.to_string(),
            updates,
        ));
        Ok(())
    }

    /// Moves a record to `state`.
    ///
    /// `peer-cancelled` aborts the upload without telling the peer.
    /// `cancelled` aborts it and sends `cancel-request`, unless the upload
    /// already finished; a failed upload is still withdrawn. Both settle
    /// progress at 1 and absorb every later update. Any other state
    /// recomputes progress from bytes sent.
    pub fn update_record_state(
        &self,
        download_id: &str,
        state: UploadState,
    ) -> Result<(), RegistryError> {
        let mut records = self.lock_records();
        let record = records
            .by_id
            .get_mut(download_id)
            .ok_or_else(|| RegistryError::NotFound(download_id.to_string()))?;

        if record.state.is_cancelled() {
            debug!(download = %download_id, current = ?record.state, requested = ?state, "record already cancelled");
            return Ok(());
        }

        let mut notify_peer = false;
        match state {
            UploadState::PeerCancelled => {
                record.handle.abort();
                record.state = UploadState::PeerCancelled;
                record.progress = 1.0;
                info!(download = %download_id, "upload cancelled by peer");
            }
            UploadState::Cancelled => {
                if record.state == UploadState::Finished {
                    debug!(download = %download_id, "upload already finished, nothing to cancel");
                    return Ok(());
                }
                record.handle.abort();
                record.state = UploadState::Cancelled;
                record.progress = 1.0;
                notify_peer = true;
                info!(download = %download_id, "upload cancelled");
            }
            other => {
                if record.state.is_terminal() {
                    return Ok(());
                }
                record.state = other;
                record.recompute_progress();
                match other {
                    UploadState::Finished => info!(download = %download_id, "upload finished"),
                    UploadState::Failed => warn!(download = %download_id, "upload failed"),
                    _ => {}
                }
            }
        }

        let event = RegistryEvent::RecordUpdated {
            download_id: download_id.to_string(),
            state: record.state,
            progress: record.progress,
        };
        drop(records);

        if notify_peer {
            self.sink
                .send(OutboundMessage::CancelRequest(download_id.to_string()));
        }
        let _ = self.events.send(event);
        Ok(())
    }

    pub fn record(&self, download_id: &str) -> Option<RecordSnapshot> {
        self.lock_records()
            .by_id
            .get(download_id)
            .map(UploadRecord::snapshot)
    }

    /// All records in registration order.
    pub fn records(&self) -> Vec<RecordSnapshot> {
        let records = self.lock_records();
        let mut all: Vec<_> = records.by_id.values().collect();
        all.sort_by_key(|r| r.seq);
        all.into_iter().map(UploadRecord::snapshot).collect()
    }

    /// Forgets a record, aborting it if still in flight.
    pub fn remove_record(&self, download_id: &str) -> Option<RecordSnapshot> {
        let record = self.lock_records().by_id.remove(download_id)?;
        if !record.state.is_terminal() {
            record.handle.abort();
        }
        let _ = self.events.send(RegistryEvent::RecordRemoved {
            download_id: download_id.to_string(),
        });
        Some(record.snapshot())
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Bytes sent across every stream and upload.
    pub fn total_bytes_transferred(&self) -> u64 {
        let streamed: u64 = {
            let index = self.streams.read().unwrap_or_else(PoisonError::into_inner);
            index.by_key.values().map(|s| s.bytes_transferred()).sum()
        };
        let uploaded: u64 = self
            .lock_records()
            .by_id
            .values()
            .map(|r| r.handle.snapshot().loaded)
            .sum();
        streamed + uploaded
    }

    /// Cancels every stream and every unfinished upload, telling the peer
    /// about each.
    pub fn abort_all(&self) {
        let streams: Vec<_> = {
            let index = self.streams.read().unwrap_or_else(PoisonError::into_inner);
            index.by_key.values().cloned().collect()
        };
        for stream in streams {
            stream.request(StreamState::Cancelled);
        }

        let unfinished: Vec<String> = self
            .lock_records()
            .by_id
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| r.download_id.clone())
            .collect();
        for download_id in unfinished {
            let _ = self.update_record_state(&download_id, UploadState::Cancelled);
        }
    }

    fn lock_records(&self) -> MutexGuard<'_, RecordTable> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn upload_state_for(state: TransferState) -> Option<UploadState> {
    match state {
        TransferState::Pending => Some(UploadState::Pending),
        TransferState::Running => Some(UploadState::Running),
        TransferState::Completed => Some(UploadState::Finished),
        TransferState::Failed => Some(UploadState::Failed),
        // Aborts come from the cancel paths, which already settled the record.
        TransferState::Aborted => None,
    }
}

async fn watch_record(
    registry: Weak<TransferRegistry>,
    download_id: String,
    mut updates: watch::Receiver<TransferSnapshot>,
) {
    loop {
        let snap = updates.borrow_and_update().clone();
        let Some(state) = upload_state_for(snap.state) else {
            return;
        };
        let Some(registry) = registry.upgrade() else {
            return;
        };
        if registry.update_record_state(&download_id, state).is_err() || state.is_terminal() {
            return;
        }
        drop(registry);

        if updates.changed().await.is_err() {
            return;
        }
    }
}

async fn forward_stream_states(
    stream_key: String,
    mut last: StreamState,
    mut status: watch::Receiver<StreamStatus>,
    events: broadcast::Sender<RegistryEvent>,
) {
    while status.changed().await.is_ok() {
        let state = status.borrow_and_update().state;
        if state == last {
            continue;
        }
        last = state;
        let _ = events.send(RegistryEvent::StreamStateChanged {
            stream_key: stream_key.clone(),
            state,
        });
        if state == StreamState::Cancelled {
            return;
        }
    }
}
