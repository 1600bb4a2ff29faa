//! Wire protocol for the beam session channel.
//!
//! Every frame is a JSON text message `{"type": ..., "payload": ...}`.
//! Frames are decoded once into [`InboundMessage`] at the connection
//! boundary; everything past that point works with typed values.

pub mod constants;
pub mod envelope;
pub mod messages;

pub use constants::MessageType;
pub use envelope::Message;
pub use messages::{
    FileAnnouncement, FileRequest, InboundMessage, OutboundMessage, RestoredSession,
    StreamChunkCancel, StreamChunkRequest, StreamRequest,
};

/// Errors produced while decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing payload for {0:?}")]
    MissingPayload(MessageType),
}
