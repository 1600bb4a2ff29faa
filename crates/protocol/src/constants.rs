use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// connection is considered dead and the transport reconnects.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum inbound text frame size in bytes (1 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Capacity of the outbound control-message queue.
pub const OUTBOX_CAPACITY: usize = 256;

/// WebSocket message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    // Session lifecycle
    CreateSession,
    RestoreSession,
    NewSession,

    // File registration
    RegisterFiles,
    FileRegistrations,

    // Whole-file downloads
    FileRequest,
    DownloadCancelled,
    CancelRequest,

    // Range-request streams
    StreamRequest,
    StreamChunk,
    StreamChunkCancel,
    CancelStream,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// The wire name, as it appears in the `type` field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateSession => "create-session",
            Self::RestoreSession => "restore-session",
            Self::NewSession => "new-session",
            Self::RegisterFiles => "register-files",
            Self::FileRegistrations => "file-registrations",
            Self::FileRequest => "file-request",
            Self::DownloadCancelled => "download-cancelled",
            Self::CancelRequest => "cancel-request",
            Self::StreamRequest => "stream-request",
            Self::StreamChunk => "stream-chunk",
            Self::StreamChunkCancel => "stream-chunk-cancel",
            Self::CancelStream => "cancel-stream",
            Self::Unknown => "unknown",
        }
    }
}
