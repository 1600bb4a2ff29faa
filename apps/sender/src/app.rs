//! Application orchestrator: wires catalog, registry, session and transport.

use std::sync::Arc;
use std::time::Duration;

use beam_protocol::constants::OUTBOX_CAPACITY;
use beam_session::{ConnectionState, Outbox, SessionConfig, SessionConnection, WsDriver};
use beam_transfer::{HttpChunkEngine, RegistryEvent, TransferRegistry};
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::catalog::LocalCatalog;
use crate::control;
use crate::config::Config;
use crate::notify::NotificationQueue;

/// Time allowed for stream withdrawals to reach the server on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Runs the sender until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let config = Arc::new(config);

    // -- Catalog --
    let catalog = Arc::new(LocalCatalog::from_paths(&config.shared_files));
    if catalog.is_empty() {
        tracing::warn!("no shared files configured");
    } else {
        tracing::info!(files = catalog.len(), "catalog ready");
    }

    // -- Registry and session --
    let (outbox, outbox_rx) = Outbox::channel(OUTBOX_CAPACITY);
    let registry = Arc::new(TransferRegistry::new(
        Arc::new(HttpChunkEngine::new()?),
        Arc::new(outbox.clone()),
        config.stream_limits(),
    ));
    let session = Arc::new(SessionConnection::new(
        SessionConfig::new(config.api_endpoint.clone()),
        Arc::clone(&registry),
        catalog.clone(),
        config.clone(),
        Arc::new(NotificationQueue::new(config.notifications)),
        outbox,
    ));

    let events = tokio::spawn(log_registry_events(registry.subscribe(), cancel.clone()));
    let failures = {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        tokio::spawn(async move { session.report_upload_failures(cancel).await })
    };

    // -- Operator commands --
    if config.auto_pause.unwrap_or(false) {
        tracing::info!("new streams wait for approval; enter `approve <stream>` to start one");
    }
    let commands = tokio::spawn(control::run(
        BufReader::new(tokio::io::stdin()),
        Arc::clone(&registry),
        cancel.clone(),
    ));

    // -- Transport --
    let driver = WsDriver::new(
        config.ws_endpoint.clone(),
        Arc::clone(&session),
        outbox_rx,
        config.reconnect_config(),
    );
    let driver_task = tokio::spawn(driver.run(cancel.clone()));

    tracing::info!("sender ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    // -- Graceful shutdown --
    registry.abort_all();
    if session.connection_state() == ConnectionState::Connected {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }
    cancel.cancel();

    let _ = driver_task.await;
    let _ = commands.await;
    let _ = failures.await;
    let _ = events.await;

    tracing::info!(
        bytes = registry.total_bytes_transferred(),
        registered = catalog.enabled_count(),
        "session closed"
    );
    Ok(())
}

/// Logs registry changes until `cancel` fires.
async fn log_registry_events(
    mut events: broadcast::Receiver<RegistryEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(RegistryEvent::StreamOpened {
                stream_key,
                file_id,
                state,
            }) => tracing::info!(stream = %stream_key, file = %file_id, %state, "stream opened"),
            Ok(RegistryEvent::StreamStateChanged { stream_key, state }) => {
                tracing::info!(stream = %stream_key, %state, "stream state changed")
            }
            Ok(RegistryEvent::StreamRemoved { stream_key }) => {
                tracing::debug!(stream = %stream_key, "stream removed")
            }
            Ok(RegistryEvent::RecordRegistered {
                download_id,
                file_id,
            }) => tracing::info!(download = %download_id, file = %file_id, "upload started"),
            Ok(RegistryEvent::RecordUpdated {
                download_id,
                state,
                progress,
            }) => tracing::debug!(
                download = %download_id,
                ?state,
                progress = format_args!("{:.1}%", progress * 100.0),
                "upload updated"
            ),
            Ok(RegistryEvent::RecordRemoved { download_id }) => {
                tracing::debug!(download = %download_id, "upload removed")
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "registry events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
