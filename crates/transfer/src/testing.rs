//! Hand-written doubles shared by the crate's tests.

use std::sync::Mutex;

use beam_protocol::OutboundMessage;

use crate::ControlSink;
use crate::engine::ChunkTransferEngine;
use crate::handle::{TransferHandle, TransferReporter};
use crate::types::{ByteRange, LocalFile};

#[derive(Debug, Clone)]
pub struct EngineCall {
    pub range: ByteRange,
    pub url: String,
    pub file_id: String,
}

/// Engine that records calls and hands the reporter to the test.
#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    transfers: Mutex<Vec<(String, TransferHandle, TransferReporter)>>,
}

impl MockEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reporter_for(&self, url: &str) -> Option<TransferReporter> {
        let transfers = self.transfers.lock().unwrap();
        transfers
            .iter()
            .rev()
            .find(|(u, _, _)| u == url)
            .map(|(_, _, r)| r.clone())
    }

    pub fn handle_for(&self, url: &str) -> Option<TransferHandle> {
        let transfers = self.transfers.lock().unwrap();
        transfers
            .iter()
            .rev()
            .find(|(u, _, _)| u == url)
            .map(|(_, h, _)| h.clone())
    }
}

impl ChunkTransferEngine for MockEngine {
    fn transfer(&self, range: ByteRange, url: &str, file: &LocalFile) -> TransferHandle {
        self.calls.lock().unwrap().push(EngineCall {
            range,
            url: url.to_string(),
            file_id: file.id.clone(),
        });
        let (handle, reporter) = TransferHandle::new(range.len());
        self.transfers
            .lock()
            .unwrap()
            .push((url.to_string(), handle.clone(), reporter));
        handle
    }
}

/// Sink that keeps every control message.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl ControlSink for RecordingSink {
    fn send(&self, msg: OutboundMessage) {
        self.sent.lock().unwrap().push(msg);
    }
}
