//! Per-file range-request stream.
//!
//! A [`TransferStream`] owns every chunk transfer for one requested file. It
//! starts chunks immediately while `running`, queues them while idle, awaiting
//! approval or paused, and drains the queue in arrival order once it runs
//! again. `cancelled` is terminal: active chunks are aborted, queued ones are
//! discarded and the peer is told exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use beam_protocol::OutboundMessage;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::ChunkTransferEngine;
use crate::handle::{TransferHandle, TransferSnapshot, TransferState};
use crate::progress::SpeedCalculator;
use crate::types::{ByteRange, LocalFile, StreamState};
use crate::{ControlSink, StreamLimits};

/// A chunk the engine is currently sending.
#[derive(Debug, Clone)]
pub struct ChunkTransfer {
    pub chunk_id: String,
    pub range: ByteRange,
    pub url: String,
    pub bytes_sent: u64,
    handle: TransferHandle,
    seq: u64,
}

/// A chunk request waiting for the stream to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunkRequest {
    pub chunk_id: String,
    pub range: ByteRange,
    pub url: String,
}

/// Observable summary of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    pub state: StreamState,
    pub bytes_transferred: u64,
    pub active_chunks: usize,
    pub pending_chunks: usize,
    pub bytes_per_second: f64,
}

/// Handle to a per-file stream. Clones share the same stream.
#[derive(Clone)]
pub struct TransferStream {
    shared: Arc<StreamShared>,
}

struct StreamShared {
    stream_key: String,
    file: LocalFile,
    engine: Arc<dyn ChunkTransferEngine>,
    sink: Arc<dyn ControlSink>,
    limits: StreamLimits,
    inner: Mutex<StreamInner>,
    status: watch::Sender<StreamStatus>,
}

struct StreamInner {
    state: StreamState,
    active: HashMap<String, ChunkTransfer>,
    pending: VecDeque<PendingChunkRequest>,
    /// Pending ids withdrawn by the requester; skipped when drained.
    suppressed: HashSet<String>,
    /// Requests accepted while running but held back by the concurrency limit.
    backlog: VecDeque<PendingChunkRequest>,
    bytes_transferred: u64,
    next_seq: u64,
    speed: SpeedCalculator,
}

impl StreamInner {
    fn pending_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|r| !self.suppressed.contains(&r.chunk_id))
            .count()
    }

    fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            bytes_transferred: self.bytes_transferred,
            active_chunks: self.active.len(),
            pending_chunks: self.pending_count(),
            bytes_per_second: self.speed.bytes_per_second(),
        }
    }
}

impl TransferStream {
    /// Creates a stream. It starts `awaiting-approval` when `require_approval`
    /// is set, otherwise `running`.
    pub fn new(
        stream_key: impl Into<String>,
        file: LocalFile,
        engine: Arc<dyn ChunkTransferEngine>,
        sink: Arc<dyn ControlSink>,
        limits: StreamLimits,
        require_approval: bool,
    ) -> Self {
        let inner = StreamInner {
            state: StreamState::Idle,
            active: HashMap::new(),
            pending: VecDeque::new(),
            suppressed: HashSet::new(),
            backlog: VecDeque::new(),
            bytes_transferred: 0,
            next_seq: 0,
            speed: SpeedCalculator::default(),
        };
        let (status, _) = watch::channel(inner.status());
        let stream = Self {
            shared: Arc::new(StreamShared {
                stream_key: stream_key.into(),
                file,
                engine,
                sink,
                limits,
                inner: Mutex::new(inner),
                status,
            }),
        };

        let initial = if require_approval {
            StreamState::AwaitingApproval
        } else {
            StreamState::Running
        };
        stream.request(initial);
        stream
    }

    pub fn stream_key(&self) -> &str {
        &self.shared.stream_key
    }

    pub fn file(&self) -> &LocalFile {
        &self.shared.file
    }

    /// Requests a state change. Returns `false`, leaving the stream
    /// untouched, when the transition is not allowed from the current state.
    pub fn request(&self, target: StreamState) -> bool {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let current = inner.state;

        if !current.accepts(target) {
            debug!(
                stream = %shared.stream_key,
                from = %current,
                to = %target,
                "state change rejected"
            );
            return false;
        }
        if current == target && target == StreamState::Cancelled {
            return true;
        }

        let mut notify_cancel = false;
        match target {
            StreamState::Cancelled => {
                for (_, chunk) in inner.active.drain() {
                    chunk.handle.abort();
                }
                inner.pending.clear();
                inner.suppressed.clear();
                inner.backlog.clear();
                inner.state = StreamState::Cancelled;
                notify_cancel = true;
            }
            StreamState::Paused => {
                let held: Vec<_> = inner.backlog.drain(..).collect();
                for req in held.into_iter().rev() {
                    inner.pending.push_front(req);
                }
                inner.state = StreamState::Paused;
            }
            StreamState::Running => {
                inner.state = StreamState::Running;
                let queued: Vec<_> = inner.pending.drain(..).collect();
                for req in queued {
                    if inner.suppressed.remove(&req.chunk_id) {
                        debug!(stream = %shared.stream_key, chunk = %req.chunk_id, "skipping withdrawn chunk");
                        continue;
                    }
                    shared.dispatch(&mut inner, req);
                }
                inner.suppressed.clear();
            }
            StreamState::Idle | StreamState::AwaitingApproval => {
                inner.state = target;
            }
        }

        info!(stream = %shared.stream_key, from = %current, to = %target, "stream state changed");
        shared.publish(&inner);
        drop(inner);

        if notify_cancel {
            shared
                .sink
                .send(OutboundMessage::CancelStream(shared.stream_key.clone()));
        }
        true
    }

    /// Accepts a chunk request: starts it while running, queues it otherwise.
    ///
    /// Requests repeating an id that is already queued or in flight are
    /// ignored. Nothing is accepted once the stream is cancelled.
    pub fn consume(&self, range: ByteRange, url: impl Into<String>, chunk_id: impl Into<String>) {
        let shared = &self.shared;
        let req = PendingChunkRequest {
            chunk_id: chunk_id.into(),
            range,
            url: url.into(),
        };
        let mut inner = shared.lock();

        match inner.state {
            StreamState::Cancelled => {
                debug!(stream = %shared.stream_key, chunk = %req.chunk_id, "chunk ignored: stream cancelled");
                return;
            }
            StreamState::Running => {
                let known = inner.active.contains_key(&req.chunk_id)
                    || inner.backlog.iter().any(|r| r.chunk_id == req.chunk_id);
                if known {
                    debug!(stream = %shared.stream_key, chunk = %req.chunk_id, "duplicate chunk ignored");
                    return;
                }
                shared.dispatch(&mut inner, req);
            }
            _ => {
                if inner.active.contains_key(&req.chunk_id) {
                    debug!(stream = %shared.stream_key, chunk = %req.chunk_id, "chunk already in flight");
                    return;
                }
                if inner.pending.iter().any(|r| r.chunk_id == req.chunk_id) {
                    // A re-request revives a withdrawn entry but keeps its place.
                    inner.suppressed.remove(&req.chunk_id);
                    debug!(stream = %shared.stream_key, chunk = %req.chunk_id, "chunk already queued");
                } else {
                    debug!(stream = %shared.stream_key, chunk = %req.chunk_id, range = %req.range, "chunk queued");
                    inner.pending.push_back(req);
                }
            }
        }
        shared.publish(&inner);
    }

    /// Withdraws one chunk. Returns `true` if the id was active or queued.
    pub fn cancel_chunk(&self, chunk_id: &str) -> bool {
        let shared = &self.shared;
        let mut inner = shared.lock();

        let found = if let Some(chunk) = inner.active.remove(chunk_id) {
            chunk.handle.abort();
            shared.fill_slots(&mut inner);
            true
        } else if let Some(pos) = inner.backlog.iter().position(|r| r.chunk_id == chunk_id) {
            inner.backlog.remove(pos);
            true
        } else if inner.pending.iter().any(|r| r.chunk_id == chunk_id) {
            inner.suppressed.insert(chunk_id.to_string());
            true
        } else {
            false
        };

        if found {
            debug!(stream = %shared.stream_key, chunk = %chunk_id, "chunk cancelled");
            shared.publish(&inner);
        }
        found
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.shared.lock().bytes_transferred
    }

    pub fn active_chunk_count(&self) -> usize {
        self.shared.lock().active.len()
    }

    pub fn pending_chunk_count(&self) -> usize {
        self.shared.lock().pending_count()
    }

    /// Queued chunk ids in the order they will run.
    pub fn pending_chunk_ids(&self) -> Vec<String> {
        let inner = self.shared.lock();
        inner
            .pending
            .iter()
            .filter(|r| !inner.suppressed.contains(&r.chunk_id))
            .map(|r| r.chunk_id.clone())
            .collect()
    }

    pub fn active_chunks(&self) -> Vec<ChunkTransfer> {
        self.shared.lock().active.values().cloned().collect()
    }

    pub fn status(&self) -> StreamStatus {
        self.shared.lock().status()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.shared.status.subscribe()
    }
}

impl std::fmt::Debug for TransferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStream")
            .field("stream_key", &self.shared.stream_key)
            .field("file_id", &self.shared.file.id)
            .finish()
    }
}

impl StreamShared {
    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &StreamInner) {
        self.status.send_replace(inner.status());
    }

    /// Starts `req` now or holds it in the backlog when at the limit.
    fn dispatch(self: &Arc<Self>, inner: &mut StreamInner, req: PendingChunkRequest) {
        if let Some(limit) = self.limits.max_concurrent_chunks
            && inner.active.len() >= limit
        {
            debug!(stream = %self.stream_key, chunk = %req.chunk_id, "chunk held back by concurrency limit");
            inner.backlog.push_back(req);
            return;
        }
        self.start_chunk(inner, req);
    }

    /// Starts backlogged chunks while there is room.
    fn fill_slots(self: &Arc<Self>, inner: &mut StreamInner) {
        if inner.state != StreamState::Running {
            return;
        }
        while !inner.backlog.is_empty() {
            if let Some(limit) = self.limits.max_concurrent_chunks
                && inner.active.len() >= limit
            {
                break;
            }
            if let Some(req) = inner.backlog.pop_front() {
                self.start_chunk(inner, req);
            }
        }
    }

    fn start_chunk(self: &Arc<Self>, inner: &mut StreamInner, req: PendingChunkRequest) {
        let handle = self.engine.transfer(req.range, &req.url, &self.file);
        let seq = inner.next_seq;
        inner.next_seq += 1;

        debug!(stream = %self.stream_key, chunk = %req.chunk_id, range = %req.range, "chunk started");
        let updates = handle.subscribe();
        inner.active.insert(
            req.chunk_id.clone(),
            ChunkTransfer {
                chunk_id: req.chunk_id.clone(),
                range: req.range,
                url: req.url,
                bytes_sent: 0,
                handle,
                seq,
            },
        );

        tokio::spawn(watch_chunk(Arc::downgrade(self), req.chunk_id, seq, updates));
    }

    /// Folds one engine snapshot into the stream. Returns `true` once the
    /// chunk needs no further observation.
    fn on_chunk_update(
        self: &Arc<Self>,
        chunk_id: &str,
        seq: u64,
        last_loaded: &mut u64,
        snap: &TransferSnapshot,
    ) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(chunk) = inner.active.get_mut(chunk_id).filter(|c| c.seq == seq) else {
            // Cancelled or replaced; it contributes nothing further.
            return true;
        };

        let delta = snap.loaded.saturating_sub(*last_loaded);
        *last_loaded = (*last_loaded).max(snap.loaded);
        chunk.bytes_sent = *last_loaded;
        if delta > 0 {
            inner.bytes_transferred += delta;
            inner.speed.record(delta);
        }

        let done = snap.state.is_terminal();
        if done {
            inner.active.remove(chunk_id);
            match snap.state {
                TransferState::Failed => warn!(
                    stream = %self.stream_key,
                    chunk = %chunk_id,
                    error = snap.error.as_deref().unwrap_or("unknown"),
                    "chunk failed"
                ),
                _ => debug!(stream = %self.stream_key, chunk = %chunk_id, state = ?snap.state, "chunk finished"),
            }
            self.fill_slots(inner);
        }

        self.publish(inner);
        done
    }
}

async fn watch_chunk(
    stream: Weak<StreamShared>,
    chunk_id: String,
    seq: u64,
    mut updates: watch::Receiver<TransferSnapshot>,
) {
    let mut last_loaded = 0u64;
    loop {
        let snap = updates.borrow_and_update().clone();
        let Some(shared) = stream.upgrade() else {
            return;
        };
        if shared.on_chunk_update(&chunk_id, seq, &mut last_loaded, &snap) {
            return;
        }
        drop(shared);

        if updates.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::handle::TransferReporter;
    use crate::testing::{MockEngine, RecordingSink};

    fn sample_file() -> LocalFile {
        LocalFile {
            id: "f1".into(),
            name: "movie.mkv".into(),
            path: "/srv/movie.mkv".into(),
            size: 10_000,
            mime: "video/x-matroska".into(),
        }
    }

    fn new_stream(
        require_approval: bool,
        limits: StreamLimits,
    ) -> (TransferStream, Arc<MockEngine>, Arc<RecordingSink>) {
        let engine = Arc::new(MockEngine::default());
        let sink = Arc::new(RecordingSink::default());
        let stream = TransferStream::new(
            "s1",
            sample_file(),
            engine.clone(),
            sink.clone(),
            limits,
            require_approval,
        );
        (stream, engine, sink)
    }

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange::new(start, end, 10_000).unwrap()
    }

    /// Lets spawned chunk watchers run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn reporter(engine: &MockEngine, chunk_id: &str) -> TransferReporter {
        engine.reporter_for(&format!("/stream/{chunk_id}")).unwrap()
    }

    #[tokio::test]
    async fn initial_state_follows_approval_flag() {
        let (running, _, _) = new_stream(false, StreamLimits::default());
        assert_eq!(running.state(), StreamState::Running);

        let (waiting, _, _) = new_stream(true, StreamLimits::default());
        assert_eq!(waiting.state(), StreamState::AwaitingApproval);
    }

    #[tokio::test]
    async fn running_stream_starts_chunk_immediately() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");

        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].range, range(0, 100));
        assert_eq!(calls[0].url, "/stream/c1");
        assert_eq!(stream.active_chunk_count(), 1);
        assert_eq!(stream.pending_chunk_count(), 0);
    }

    #[tokio::test]
    async fn approval_drains_single_pending_chunk() {
        let (stream, engine, _) = new_stream(true, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        assert!(engine.calls().is_empty());
        assert_eq!(stream.pending_chunk_ids(), vec!["c1".to_string()]);

        assert!(stream.request(StreamState::Running));
        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].range, range(0, 100));
        assert_eq!(stream.pending_chunk_count(), 0);
    }

    #[tokio::test]
    async fn pending_chunks_drain_in_fifo_order() {
        let (stream, engine, _) = new_stream(true, StreamLimits::default());
        for (i, id) in ["c3", "c1", "c2"].iter().enumerate() {
            let start = i as u64 * 100;
            stream.consume(range(start, start + 100), format!("/stream/{id}"), *id);
        }

        stream.request(StreamState::Running);
        let order: Vec<_> = engine.calls().into_iter().map(|c| c.url).collect();
        assert_eq!(order, vec!["/stream/c3", "/stream/c1", "/stream/c2"]);
        assert!(stream.pending_chunk_ids().is_empty());
    }

    #[tokio::test]
    async fn duplicate_pending_chunk_keeps_first_request() {
        let (stream, engine, _) = new_stream(true, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.consume(range(500, 900), "/stream/c1-again", "c1");
        assert_eq!(stream.pending_chunk_count(), 1);

        stream.request(StreamState::Running);
        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].range, range(0, 100));
    }

    #[tokio::test]
    async fn duplicate_active_chunk_is_ignored() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.consume(range(0, 100), "/stream/c1", "c1");
        assert_eq!(engine.calls().len(), 1);
        assert_eq!(stream.active_chunk_count(), 1);
    }

    #[tokio::test]
    async fn paused_stream_queues_new_chunks() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        assert!(stream.request(StreamState::Paused));
        stream.consume(range(0, 100), "/stream/c1", "c1");
        assert!(engine.calls().is_empty());
        assert_eq!(stream.pending_chunk_count(), 1);

        assert!(stream.request(StreamState::Running));
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn paused_stream_does_not_requeue_in_flight_chunk() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.request(StreamState::Paused);
        stream.consume(range(0, 100), "/stream/c1", "c1");
        assert_eq!(stream.pending_chunk_count(), 0);

        stream.request(StreamState::Running);
        assert_eq!(engine.calls().len(), 1);
        assert_eq!(stream.active_chunk_count(), 1);
    }

    #[tokio::test]
    async fn rejected_transitions_leave_state_unchanged() {
        let (stream, _, _) = new_stream(true, StreamLimits::default());
        assert!(!stream.request(StreamState::Paused));
        assert!(!stream.request(StreamState::Idle));
        assert_eq!(stream.state(), StreamState::AwaitingApproval);

        assert!(stream.request(StreamState::Running));
        assert!(!stream.request(StreamState::Running));
        assert!(!stream.request(StreamState::AwaitingApproval));
        assert_eq!(stream.state(), StreamState::Running);
    }

    #[tokio::test]
    async fn cancel_is_terminal_and_notifies_once() {
        let (stream, engine, sink) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        let handle = engine.handle_for("/stream/c1").unwrap();

        assert!(stream.request(StreamState::Cancelled));
        assert!(handle.is_aborted());
        assert_eq!(stream.active_chunk_count(), 0);

        assert!(stream.request(StreamState::Cancelled));
        for target in [
            StreamState::Idle,
            StreamState::AwaitingApproval,
            StreamState::Running,
            StreamState::Paused,
        ] {
            assert!(!stream.request(target));
        }
        assert_eq!(stream.state(), StreamState::Cancelled);
        assert_eq!(
            sink.sent(),
            vec![OutboundMessage::CancelStream("s1".into())]
        );

        stream.consume(range(100, 200), "/stream/c2", "c2");
        assert_eq!(engine.calls().len(), 1);
        assert_eq!(stream.pending_chunk_count(), 0);
    }

    #[tokio::test]
    async fn cancel_discards_pending_requests() {
        let (stream, engine, _) = new_stream(true, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.request(StreamState::Cancelled);
        assert_eq!(stream.pending_chunk_count(), 0);
        assert!(!stream.request(StreamState::Running));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn progress_deltas_accumulate() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.consume(range(100, 300), "/stream/c2", "c2");
        let r1 = reporter(&engine, "c1");
        let r2 = reporter(&engine, "c2");

        r1.progress(40);
        settle().await;
        r2.progress(150);
        settle().await;
        r1.progress(100);
        r1.complete();
        settle().await;

        assert_eq!(stream.bytes_transferred(), 250);
        assert_eq!(stream.active_chunk_count(), 1);

        r2.progress(200);
        r2.complete();
        settle().await;
        assert_eq!(stream.bytes_transferred(), 300);
        assert_eq!(stream.active_chunk_count(), 0);
    }

    #[tokio::test]
    async fn completing_one_chunk_leaves_sibling_progress_alone() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.consume(range(100, 200), "/stream/c2", "c2");
        let r1 = reporter(&engine, "c1");
        let r2 = reporter(&engine, "c2");

        r1.progress(50);
        r2.progress(70);
        settle().await;
        r1.progress(100);
        r1.complete();
        settle().await;

        let active: Vec<_> = stream
            .active_chunks()
            .into_iter()
            .map(|c| (c.chunk_id, c.bytes_sent))
            .collect();
        assert_eq!(active, vec![("c2".to_string(), 70)]);
        assert_eq!(stream.bytes_transferred(), 170);
    }

    #[tokio::test]
    async fn failed_chunk_stops_contributing() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        let r1 = reporter(&engine, "c1");

        r1.progress(30);
        r1.fail("connection reset");
        settle().await;
        r1.progress(90);
        settle().await;

        assert_eq!(stream.bytes_transferred(), 30);
        assert_eq!(stream.active_chunk_count(), 0);
        assert_eq!(stream.state(), StreamState::Running);
    }

    #[tokio::test]
    async fn cancel_chunk_active() {
        let (stream, engine, _) = new_stream(false, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        let r1 = reporter(&engine, "c1");
        r1.progress(10);
        settle().await;

        assert!(stream.cancel_chunk("c1"));
        assert!(engine.handle_for("/stream/c1").unwrap().is_aborted());
        assert_eq!(stream.active_chunk_count(), 0);

        r1.progress(80);
        settle().await;
        assert_eq!(stream.bytes_transferred(), 10);
        assert!(!stream.cancel_chunk("c1"));
    }

    #[tokio::test]
    async fn cancel_chunk_pending_is_skipped_on_drain() {
        let (stream, engine, _) = new_stream(true, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.consume(range(100, 200), "/stream/c2", "c2");

        assert!(stream.cancel_chunk("c1"));
        assert_eq!(stream.pending_chunk_ids(), vec!["c2".to_string()]);

        stream.request(StreamState::Running);
        let urls: Vec<_> = engine.calls().into_iter().map(|c| c.url).collect();
        assert_eq!(urls, vec!["/stream/c2"]);
    }

    #[tokio::test]
    async fn cancel_chunk_unknown_returns_false() {
        let (stream, _, _) = new_stream(false, StreamLimits::default());
        assert!(!stream.cancel_chunk("nope"));
    }

    #[tokio::test]
    async fn rerequest_revives_withdrawn_pending_chunk() {
        let (stream, engine, _) = new_stream(true, StreamLimits::default());
        stream.consume(range(0, 100), "/stream/c1", "c1");
        stream.cancel_chunk("c1");
        stream.consume(range(0, 100), "/stream/c1", "c1");
        assert_eq!(stream.pending_chunk_count(), 1);

        stream.request(StreamState::Running);
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn concurrency_limit_backlogs_and_refills() {
        let limits = StreamLimits {
            max_concurrent_chunks: Some(2),
        };
        let (stream, engine, _) = new_stream(false, limits);
        for id in ["c1", "c2", "c3", "c4"] {
            stream.consume(range(0, 10), format!("/stream/{id}"), id);
        }
        assert_eq!(engine.calls().len(), 2);
        assert_eq!(stream.active_chunk_count(), 2);

        reporter(&engine, "c1").complete();
        settle().await;
        assert_eq!(engine.calls().len(), 3);
        assert_eq!(engine.calls()[2].url, "/stream/c3");

        assert!(stream.cancel_chunk("c4"));
        reporter(&engine, "c2").complete();
        settle().await;
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test]
    async fn pause_moves_backlog_ahead_of_new_requests() {
        let limits = StreamLimits {
            max_concurrent_chunks: Some(1),
        };
        let (stream, engine, _) = new_stream(false, limits);
        stream.consume(range(0, 10), "/stream/c1", "c1");
        stream.consume(range(0, 10), "/stream/c2", "c2");
        stream.request(StreamState::Paused);
        stream.consume(range(0, 10), "/stream/c3", "c3");

        assert_eq!(
            stream.pending_chunk_ids(),
            vec!["c2".to_string(), "c3".to_string()]
        );
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_state_changes() {
        let (stream, _, _) = new_stream(true, StreamLimits::default());
        let mut rx = stream.subscribe();
        assert_eq!(rx.borrow_and_update().state, StreamState::AwaitingApproval);

        stream.request(StreamState::Running);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, StreamState::Running);
    }
}
