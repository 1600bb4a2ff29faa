//! Socket reader: dispatches control messages and watches for silence.

use std::ops::ControlFlow;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as Frame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use beam_protocol::constants::WS_PONG_WAIT;

use crate::session::SessionConnection;

/// Reads frames until the connection ends, is cancelled, or goes quiet for
/// longer than [`WS_PONG_WAIT`].
pub(crate) async fn read_pump<S>(
    mut read: S,
    session: &SessionConnection,
    write_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Frame, tungstenite::Error>> + Unpin,
{
    let silence = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(silence);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            () = &mut silence => {
                warn!(wait_secs = WS_PONG_WAIT.as_secs(), "no traffic from server, dropping connection");
                return;
            }
            next = read.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!("WebSocket read error: {e}");
                return;
            }
            None => {
                debug!("server closed the stream");
                return;
            }
        };

        silence.as_mut().reset(Instant::now() + WS_PONG_WAIT);
        if on_frame(frame, session, &write_tx).await.is_break() {
            return;
        }
    }
}

async fn on_frame(
    frame: Frame,
    session: &SessionConnection,
    write_tx: &mpsc::Sender<Frame>,
) -> ControlFlow<()> {
    match frame {
        Frame::Text(text) => session.handle_text(&text),
        Frame::Ping(data) => {
            // A closed writer means the connection is already going away.
            if write_tx.send(Frame::Pong(data)).await.is_err() {
                return ControlFlow::Break(());
            }
        }
        Frame::Close(close) => {
            debug!(?close, "close frame received");
            return ControlFlow::Break(());
        }
        Frame::Pong(_) => trace!("pong"),
        Frame::Binary(data) => trace!(len = data.len(), "ignoring binary frame"),
        Frame::Frame(_) => {}
    }
    ControlFlow::Continue(())
}
