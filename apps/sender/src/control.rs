//! Operator commands, one per line on stdin.
//!
//! `approve <stream>` and `resume <stream>` start a stream, `pause <stream>`
//! holds it and `cancel <stream>` withdraws it. With `auto_pause` set this is
//! how a held stream gets approved.

use std::sync::Arc;

use beam_transfer::{StreamState, TransferRegistry};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub stream_key: String,
    pub target: StreamState,
}

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let target = match verb {
            "approve" | "resume" => StreamState::Running,
            "pause" => StreamState::Paused,
            "cancel" => StreamState::Cancelled,
            other => anyhow::bail!("unknown command {other:?}"),
        };
        let Some(stream_key) = words.next() else {
            anyhow::bail!("`{verb}` needs a stream key");
        };
        Ok(Self {
            stream_key: stream_key.to_string(),
            target,
        })
    }
}

/// Requests the command's state on its stream. Returns whether the stream
/// accepted it.
pub fn apply(registry: &TransferRegistry, command: &Command) -> bool {
    let Some(stream) = registry.stream(&command.stream_key) else {
        tracing::warn!(stream = %command.stream_key, "no such stream");
        return false;
    };

    let accepted = stream.request(command.target);
    if accepted {
        tracing::info!(stream = %command.stream_key, target = %command.target, "stream state changed by operator");
    } else {
        tracing::warn!(
            stream = %command.stream_key,
            current = %stream.state(),
            target = %command.target,
            "transition rejected"
        );
    }
    accepted
}

/// Reads and applies commands from `input` until EOF or `cancel` fires.
pub async fn run<R>(input: R, registry: Arc<TransferRegistry>, cancel: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match Command::parse(&line) {
                Ok(command) => {
                    apply(&registry, &command);
                }
                Err(e) => tracing::warn!("{e}"),
            },
            Ok(None) => {
                tracing::debug!("command input closed");
                return;
            }
            Err(e) => {
                tracing::warn!("failed to read command: {e}");
                return;
            }
        }
    }
}
