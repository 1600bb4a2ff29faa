//! Interfaces the session consumes from the host application.

use beam_transfer::LocalFile;

/// The set of files this sender offers.
pub trait FileCatalog: Send + Sync {
    /// Looks up a listed file by id.
    fn listed_file(&self, file_id: &str) -> Option<LocalFile>;

    /// Every listed file, in announcement order.
    fn listed_files(&self) -> Vec<LocalFile>;

    /// Marks files as registered with the server and requestable.
    fn enable_files(&self, file_ids: &[String]);
}

/// User preferences that affect transfers.
pub trait TransferSettings: Send + Sync {
    /// Whether new streams wait for approval. `None` means unset.
    fn require_manual_start(&self) -> Option<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    /// Returns `true` if the notification was shown.
    fn push(&self, notification: Notification) -> bool;
}
