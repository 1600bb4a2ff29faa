//! WebSocket transport for the session, with reconnection.

use std::sync::Arc;

use beam_protocol::OutboundMessage;
use beam_protocol::constants::{OUTBOX_CAPACITY, WS_MAX_MESSAGE_SIZE};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::WsError;
use crate::pumps::{read::read_pump, write::write_pump};
use crate::session::SessionConnection;
use crate::types::ReconnectConfig;

/// Keeps a session connected until cancelled.
///
/// Every connection starts with the session handshake, then drains the
/// outbox. Losing the connection only marks the session disconnected;
/// streams and uploads carry on.
pub struct WsDriver {
    url: String,
    session: Arc<SessionConnection>,
    outbox: mpsc::Receiver<OutboundMessage>,
    reconnect: ReconnectConfig,
}

impl WsDriver {
    pub fn new(
        url: impl Into<String>,
        session: Arc<SessionConnection>,
        outbox: mpsc::Receiver<OutboundMessage>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            url: url.into(),
            session,
            outbox,
            reconnect,
        }
    }

    /// Connects, serves, and reconnects with backoff until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            match self.serve_once(&cancel).await {
                Ok(()) => attempt = 0,
                Err(e) => warn!(url = %self.url, attempt, error = %e, "connection attempt failed"),
            }
            self.session.mark_disconnected();

            if cancel.is_cancelled() {
                break;
            }

            attempt = attempt.saturating_add(1);
            let delay = self.reconnect.delay_for_attempt(attempt);
            let delay_secs = delay.as_secs_f64();
            info!(
                url = %self.url,
                attempt,
                delay_secs = format_args!("{delay_secs:.1}"),
                "reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(url = %self.url, "session driver stopped");
    }

    /// Runs one connection to completion.
    async fn serve_once(&mut self, cancel: &CancellationToken) -> Result<(), WsError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let connect = tokio_tungstenite::connect_async_with_config(&self.url, Some(ws_config), false);
        let (ws_stream, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = connect => result?,
        };
        let (mut write, read) = ws_stream.split();

        // The handshake must precede anything queued in the outbox.
        let handshake = self.session.handshake();
        debug!(msg_type = ?handshake.msg_type(), "sending handshake");
        write
            .send(tungstenite::Message::Text(handshake.encode()?.into()))
            .await?;
        self.session.mark_connected();

        let conn_cancel = cancel.child_token();
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(OUTBOX_CAPACITY);
        let writer = tokio::spawn(write_pump(write, write_rx, conn_cancel.clone()));

        tokio::select! {
            _ = read_pump(read, &self.session, write_tx.clone(), conn_cancel.clone()) => {}
            _ = forward_outbox(&mut self.outbox, write_tx) => {}
        }

        conn_cancel.cancel();
        match writer.await {
            Ok(Err(e)) => debug!("writer stopped: {e}"),
            Err(e) => warn!("writer task failed: {e}"),
            Ok(Ok(())) => {}
        }
        Ok(())
    }
}

/// Moves queued control messages onto the socket.
///
/// A message leaves the outbox only once the writer has room for it, so
/// dropping this future mid-wait leaves it queued for the next connection.
async fn forward_outbox(
    outbox: &mut mpsc::Receiver<OutboundMessage>,
    write_tx: mpsc::Sender<tungstenite::Message>,
) {
    loop {
        let Ok(permit) = write_tx.reserve().await else {
            debug!("writer gone, leaving control messages queued");
            return;
        };
        let Some(msg) = outbox.recv().await else {
            return;
        };
        match msg.encode() {
            Ok(json) => permit.send(tungstenite::Message::Text(json.into())),
            Err(e) => warn!(msg_type = ?msg.msg_type(), "failed to encode control message: {e}"),
        }
    }
}
