use beam_protocol::OutboundMessage;
use beam_transfer::ControlSink;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Queue of control messages awaiting the transport.
///
/// Messages sent while disconnected stay queued and are written after the
/// next handshake.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Outbox, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Outbox { tx }, rx)
    }
}

impl ControlSink for Outbox {
    fn send(&self, msg: OutboundMessage) {
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                warn!(msg_type = ?msg.msg_type(), "outbox full, dropping control message");
            }
            Err(TrySendError::Closed(msg)) => {
                debug!(msg_type = ?msg.msg_type(), "transport gone, dropping control message");
            }
        }
    }
}
