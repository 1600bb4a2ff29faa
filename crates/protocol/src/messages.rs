use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{MessageType, WS_MAX_MESSAGE_SIZE};
use crate::envelope::Message;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Server confirmation that a previous session was restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoredSession {
    pub key: String,
    /// File ids the server still has registered for this session.
    #[serde(default)]
    pub files: Vec<String>,
}

/// A requester asked for a whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    pub file_id: String,
    pub download_id: String,
}

/// A file offered by this sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnnouncement {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
}

/// A requester opened a range-request stream on a listed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub file_id: String,
    pub stream_key: String,
}

/// One byte range requested on an open stream. `range` is half-open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkRequest {
    pub stream_key: String,
    pub chunk_id: String,
    pub range: (u64, u64),
}

/// The requester no longer wants a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunkCancel {
    pub stream_key: String,
    pub chunk_id: String,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The raw `type` field of a frame whose type the enum does not know.
#[derive(Deserialize)]
struct TypeName {
    #[serde(rename = "type")]
    name: String,
}

/// A decoded server-to-sender message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    RestoreSession(RestoredSession),
    NewSession(String),
    FileRegistrations(Vec<String>),
    FileRequest(FileRequest),
    DownloadCancelled(String),
    StreamRequest(StreamRequest),
    StreamChunk(StreamChunkRequest),
    StreamChunkCancel(StreamChunkCancel),
    /// Unknown or outbound-only type, by its wire name; callers log and
    /// ignore it.
    Unrecognized(String),
}

impl InboundMessage {
    /// Decodes a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let msg: Message = serde_json::from_str(text)?;
        if msg.msg_type == MessageType::Unknown {
            let TypeName { name } = serde_json::from_str(text)?;
            return Ok(Self::Unrecognized(name));
        }
        Self::from_message(&msg)
    }

    /// Converts an envelope into a typed message.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        let decoded = match msg.msg_type {
            MessageType::RestoreSession => Self::RestoreSession(msg.require_payload()?),
            MessageType::NewSession => Self::NewSession(msg.require_payload()?),
            MessageType::FileRegistrations => Self::FileRegistrations(msg.require_payload()?),
            MessageType::FileRequest => Self::FileRequest(msg.require_payload()?),
            MessageType::DownloadCancelled => Self::DownloadCancelled(msg.require_payload()?),
            MessageType::StreamRequest => Self::StreamRequest(msg.require_payload()?),
            MessageType::StreamChunk => Self::StreamChunk(msg.require_payload()?),
            MessageType::StreamChunkCancel => Self::StreamChunkCancel(msg.require_payload()?),
            other => Self::Unrecognized(other.as_str().to_string()),
        };
        Ok(decoded)
    }

    /// Returns `true` if a text frame is too large to be decoded.
    pub fn exceeds_limit(text: &str) -> bool {
        text.len() > WS_MAX_MESSAGE_SIZE
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A sender-to-server control message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    CreateSession,
    RestoreSession(String),
    RegisterFiles(Vec<FileAnnouncement>),
    /// Withdraws a range-request stream by stream key.
    CancelStream(String),
    /// Withdraws a whole-file download by download id.
    CancelRequest(String),
}

impl OutboundMessage {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::CreateSession => MessageType::CreateSession,
            Self::RestoreSession(_) => MessageType::RestoreSession,
            Self::RegisterFiles(_) => MessageType::RegisterFiles,
            Self::CancelStream(_) => MessageType::CancelStream,
            Self::CancelRequest(_) => MessageType::CancelRequest,
        }
    }

    /// Wraps this message in an envelope.
    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        let msg_type = self.msg_type();
        match self {
            Self::CreateSession => Message::new::<()>(msg_type, None),
            Self::RestoreSession(key) => Message::new(msg_type, Some(key)),
            Self::RegisterFiles(files) => Message::new(msg_type, Some(files)),
            Self::CancelStream(key) => Message::new(msg_type, Some(key)),
            Self::CancelRequest(id) => Message::new(msg_type, Some(id)),
        }
    }

    /// Serializes this message to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_message()?)
    }
}
