use std::fmt;
use std::path::{Path, PathBuf};

use beam_protocol::FileAnnouncement;
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// MIME type announced when none is known.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// A half-open byte range `[start, end)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Validates `start < end <= size`.
    pub fn new(start: u64, end: u64, size: u64) -> Result<Self, TransferError> {
        if start >= end || end > size {
            return Err(TransferError::InvalidRange { start, end, size });
        }
        Ok(Self { start, end })
    }

    /// The whole file. Empty when `size` is zero.
    pub fn whole(size: u64) -> Self {
        Self {
            start: 0,
            end: size,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A file offered by this sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub mime: String,
}

impl LocalFile {
    /// Describes a file on disk, reading its size from metadata.
    pub fn from_path(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            id: id.into(),
            name,
            path: path.to_path_buf(),
            size: meta.len(),
            mime: DEFAULT_MIME.to_string(),
        })
    }

    /// The wire description sent in `register-files`.
    pub fn announcement(&self) -> FileAnnouncement {
        FileAnnouncement {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            mime: self.mime.clone(),
        }
    }
}

/// Lifecycle of a range-request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamState {
    Idle,
    AwaitingApproval,
    Running,
    Paused,
    Cancelled,
}

impl StreamState {
    pub const ALL: [StreamState; 5] = [
        StreamState::Idle,
        StreamState::AwaitingApproval,
        StreamState::Running,
        StreamState::Paused,
        StreamState::Cancelled,
    ];

    /// Returns `true` if a request for `target` is accepted from `self`.
    pub fn accepts(self, target: StreamState) -> bool {
        match target {
            StreamState::Idle | StreamState::AwaitingApproval => self == StreamState::Idle,
            StreamState::Paused => self == StreamState::Running,
            StreamState::Running => {
                !matches!(self, StreamState::Running | StreamState::Cancelled)
            }
            StreamState::Cancelled => true,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Idle => "idle",
            StreamState::AwaitingApproval => "awaiting-approval",
            StreamState::Running => "running",
            StreamState::Paused => "paused",
            StreamState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a whole-file outgoing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadState {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
    PeerCancelled,
}

impl UploadState {
    /// Cancellation by either side is absorbing.
    pub fn is_cancelled(self) -> bool {
        matches!(self, UploadState::Cancelled | UploadState::PeerCancelled)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadState::Pending | UploadState::Running)
    }
}
