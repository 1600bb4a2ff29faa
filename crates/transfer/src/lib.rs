//! Range-request streams and whole-file uploads for a file sender.
//!
//! [`ChunkTransferEngine`] moves bytes, [`TransferStream`] decides when a
//! requested range may move, and [`TransferRegistry`] owns every stream and
//! outgoing upload for the session.

mod engine;
mod handle;
mod progress;
mod registry;
mod stream;
mod types;

#[cfg(test)]
pub(crate) mod testing;

use beam_protocol::OutboundMessage;

pub use engine::{ChunkTransferEngine, HttpChunkEngine};
pub use handle::{TransferHandle, TransferReporter, TransferSnapshot, TransferState};
pub use progress::SpeedCalculator;
pub use registry::{RecordSnapshot, RegistryEvent, TransferRegistry};
pub use stream::{ChunkTransfer, PendingChunkRequest, StreamStatus, TransferStream};
pub use types::{ByteRange, DEFAULT_MIME, LocalFile, StreamState, UploadState};

/// Outbound channel for control messages to the peer.
///
/// Sends never block; implementations queue or drop.
pub trait ControlSink: Send + Sync {
    fn send(&self, msg: OutboundMessage);
}

/// Per-stream limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLimits {
    /// Maximum chunks in flight per stream. `None` starts every request.
    pub max_concurrent_chunks: Option<usize>,
}

/// Errors produced by transfers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid range [{start}, {end}) for file of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },
}

/// Errors produced by the registry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no record for download {0}")]
    NotFound(String),

    #[error("stream {0} already open")]
    DuplicateStream(String),

    #[error("download {0} already registered")]
    DuplicateRecord(String),
}
