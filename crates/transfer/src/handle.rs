use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Lifecycle of a single engine transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Aborted
        )
    }
}

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub state: TransferState,
    /// Cumulative bytes sent; never decreases.
    pub loaded: u64,
    pub total: u64,
    pub error: Option<String>,
}

struct Shared {
    status: watch::Sender<TransferSnapshot>,
    cancel: CancellationToken,
}

/// Consumer side of a transfer: observe progress or abort.
#[derive(Clone)]
pub struct TransferHandle {
    shared: Arc<Shared>,
}

/// Producer side of a transfer, held by the engine.
#[derive(Clone)]
pub struct TransferReporter {
    shared: Arc<Shared>,
}

impl TransferHandle {
    /// Creates a pending transfer of `total` bytes.
    pub fn new(total: u64) -> (TransferHandle, TransferReporter) {
        let (status, _) = watch::channel(TransferSnapshot {
            state: TransferState::Pending,
            loaded: 0,
            total,
            error: None,
        });
        let shared = Arc::new(Shared {
            status,
            cancel: CancellationToken::new(),
        });
        (
            TransferHandle {
                shared: Arc::clone(&shared),
            },
            TransferReporter { shared },
        )
    }

    /// Stops the transfer. Aborting a finished or already-aborted transfer
    /// does nothing.
    pub fn abort(&self) {
        self.shared.cancel.cancel();
        publish_terminal(&self.shared, TransferState::Aborted, None);
    }

    /// Returns `true` once `abort` has been called on any clone.
    pub fn is_aborted(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferSnapshot> {
        self.shared.status.subscribe()
    }
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("snapshot", &*self.shared.status.borrow())
            .finish()
    }
}

impl TransferReporter {
    /// Pending -> Running.
    pub fn start(&self) {
        self.shared.status.send_if_modified(|s| {
            if s.state != TransferState::Pending {
                return false;
            }
            s.state = TransferState::Running;
            true
        });
    }

    /// Publishes cumulative progress. Regressions and updates after a
    /// terminal state are dropped.
    pub fn progress(&self, loaded: u64) {
        self.shared.status.send_if_modified(|s| {
            if s.state.is_terminal() || loaded <= s.loaded {
                return false;
            }
            s.loaded = loaded;
            s.state = TransferState::Running;
            true
        });
    }

    pub fn complete(&self) {
        publish_terminal(&self.shared, TransferState::Completed, None);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        publish_terminal(&self.shared, TransferState::Failed, Some(reason.into()));
    }

    pub fn is_finished(&self) -> bool {
        self.shared.status.borrow().state.is_terminal()
    }

    /// Resolves when the consumer aborts.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.shared.cancel.cancelled()
    }
}

fn publish_terminal(shared: &Shared, state: TransferState, error: Option<String>) {
    shared.status.send_if_modified(|s| {
        if s.state.is_terminal() {
            return false;
        }
        s.state = state;
        s.error = error;
        true
    });
}
