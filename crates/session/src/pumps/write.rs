//! Socket writer: queued frames plus keepalive pings.

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use beam_protocol::constants::WS_PING_PERIOD;

use crate::WsError;

/// Owns the socket's write half.
///
/// Frames from `frames` are written in order and a ping goes out every
/// [`WS_PING_PERIOD`] so the server's read deadline never fires. Ends when
/// cancelled, when every frame sender is gone, or on the first write error.
/// Frames already queued at cancellation are still written, then a close
/// frame is attempted.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut frames: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        let frame = tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break Ok(()),
            },
            _ = cancel.cancelled() => break flush_queued(&mut sink, &mut frames).await,
            _ = keepalive.tick() => {
                trace!("sending ping");
                tungstenite::Message::Ping(Vec::new().into())
            }
        };
        if let Err(e) = sink.send(frame).await {
            break Err(WsError::from(e));
        }
    };

    let _ = sink.send(tungstenite::Message::Close(None)).await;
    result
}

/// Writes frames that were queued before cancellation.
async fn flush_queued<S>(
    sink: &mut S,
    frames: &mut mpsc::Receiver<tungstenite::Message>,
) -> Result<(), WsError>
where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    frames.close();
    while let Ok(frame) = frames.try_recv() {
        sink.send(frame).await?;
    }
    Ok(())
}
