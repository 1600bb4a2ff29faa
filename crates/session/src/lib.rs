//! Session layer for a file sender.
//!
//! [`SessionConnection`] negotiates the session key and dispatches inbound
//! control messages to the transfer registry. [`WsDriver`] owns the
//! WebSocket, reconnecting with backoff and replaying the handshake on every
//! connect.

pub mod collaborators;
mod driver;
mod outbox;
mod pumps;
mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use tokio_tungstenite::tungstenite;

pub use collaborators::{FileCatalog, Notification, NotificationLevel, Notifier, TransferSettings};
pub use driver::WsDriver;
pub use outbox::Outbox;
pub use session::SessionConnection;
pub use types::{ConnectionState, ReconnectConfig, SessionConfig};

/// Errors from the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
