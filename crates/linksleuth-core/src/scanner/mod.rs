/// Scanner module - orchestrates link scan sessions.
///
/// A session enumerates a volume on background threads, validates what the
/// enumerator streams, and publishes one consistent snapshot when it
/// completes:
/// - **Tier 1 (USN):** MFT enumeration through `FSCTL_ENUM_USN_DATA` (requires admin).
/// - **Tier 2 (walk):** `jwalk`-based parallel directory traversal (no admin).
///
/// Observers read [`ScanState`] through [`ScanCoordinator::state`] (an
/// `Arc<RwLock<_>>` snapshot, the way the UI reads a live tree) or drain
/// [`ScanCoordinator::events`]. Every message that reaches the coordinator
/// carries its session id; messages from a superseded session are dropped.
pub mod enumerator;
pub mod progress;
pub mod session;
#[cfg(windows)]
pub mod usn;
pub mod walk;

pub use enumerator::{LinkEnumerator, ScanSink, SinkMessage, SinkPayload, TieredEnumerator};
pub use progress::{ScanEvent, ScanProgress, ScanStrategy};
pub use session::{ScanPhase, ScanSession, ScanState, SessionId};

use crate::error::ScanError;
use crate::model::{paths, LinkEntry, RawEntry};
use crate::validator::{validate_batch, TargetResolver};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often buffered entries are flushed to [`ScanState::streamed`].
///
/// Scans can produce 10^5 links; flushing per batch would wake observers
/// thousands of times per second.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(150);

/// Maximum number of [`ScanEvent`]s queued for observers. Events beyond this
/// are dropped; [`ScanState`] stays authoritative.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Entries validated per step of the final pass. Cancellation is checked
/// between steps.
const VALIDATION_CHUNK: usize = 4_096;

/// State shared between the coordinator and its session threads.
struct Shared {
    state: RwLock<ScanState>,
    /// Bumped after every state change; `changed` is signalled with it held.
    generation: Mutex<u64>,
    changed: Condvar,
    events_tx: Sender<ScanEvent>,
    events_rx: Receiver<ScanEvent>,
}

impl Shared {
    fn new() -> Self {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(ScanState::default()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
            events_tx,
            events_rx,
        }
    }

    /// Apply `update` if `session` still owns the state and is running.
    /// Returns whether the update was applied.
    fn update_if_live(&self, session: SessionId, update: impl FnOnce(&mut ScanState)) -> bool {
        let applied = {
            let mut state = self.state.write();
            if state.is_live(session) {
                update(&mut state);
                true
            } else {
                false
            }
        };
        if applied {
            self.notify();
        }
        applied
    }

    fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    fn emit(&self, event: ScanEvent) {
        // A full channel means nobody is draining it.
        let _ = self.events_tx.try_send(event);
    }
}

/// Owns scan sessions and the published snapshot.
///
/// Only one session is authoritative at a time. Starting a scan cancels the
/// previous session without waiting for its threads to exit.
pub struct ScanCoordinator {
    enumerator: Arc<dyn LinkEnumerator>,
    resolver: Arc<dyn TargetResolver>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    active: Mutex<Option<ScanSession>>,
    flush_interval: Duration,
}

impl ScanCoordinator {
    pub fn new(enumerator: Arc<dyn LinkEnumerator>, resolver: Arc<dyn TargetResolver>) -> Self {
        Self {
            enumerator,
            resolver,
            shared: Arc::new(Shared::new()),
            next_id: AtomicU64::new(0),
            active: Mutex::new(None),
            flush_interval: FLUSH_INTERVAL,
        }
    }

    /// Override the streaming flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Start a new session on `volume`.
    ///
    /// Cancels any in-flight session, clears the published snapshot and
    /// spawns the enumeration in the background.
    pub fn start_scan(&self, volume: &str) -> Result<ScanSession, ScanError> {
        let volume = volume.trim();
        if volume.is_empty() {
            return Err(ScanError::InvalidVolume(volume.to_string()));
        }

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            debug!("Cancelling superseded scan session {}", previous.id);
            previous.cancel();
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let session = ScanSession::new(id, volume.to_string(), cancel_flag.clone());

        self.shared.state.write().reset_for(id, volume);
        self.shared.notify();
        self.shared.emit(ScanEvent::Started {
            session: id,
            volume: volume.to_string(),
        });

        let run = SessionRun {
            id,
            volume: volume.to_string(),
            cancel_flag,
            enumerator: self.enumerator.clone(),
            resolver: self.resolver.clone(),
            shared: self.shared.clone(),
            flush_interval: self.flush_interval,
        };

        let spawned = thread::Builder::new()
            .name("linksleuth-scan".into())
            .spawn(move || run.run());

        if let Err(err) = spawned {
            error!("Failed to spawn scan thread for session {id}: {err}");
            let message = format!("Failed to spawn scan thread: {err}");
            self.shared.update_if_live(id, |state| {
                state.phase = ScanPhase::Failed;
                state.error = Some(message.clone());
            });
            self.shared.emit(ScanEvent::Failed {
                session: id,
                message,
            });
            return Err(ScanError::Spawn(err));
        }

        info!("Started scan session {id} on {volume}");
        *active = Some(session.clone());
        Ok(session)
    }

    /// Scan the most recently scanned volume again. Returns `None` if no scan
    /// has ever been started.
    pub fn rescan(&self) -> Result<Option<ScanSession>, ScanError> {
        let volume = self.shared.state.read().volume.clone();
        match volume {
            Some(volume) => self.start_scan(&volume).map(Some),
            None => Ok(None),
        }
    }

    /// Cancel the in-flight session, if any. Buffered entries are discarded
    /// and the published snapshot is left as it is.
    pub fn cancel(&self) {
        let active = self.active.lock();
        let Some(session) = active.as_ref() else {
            return;
        };
        session.cancel();
        let cancelled = self.shared.update_if_live(session.id, |state| {
            state.phase = ScanPhase::Cancelled;
            state.streamed = Arc::new(Vec::new());
            state.progress = None;
        });
        if cancelled {
            info!("Scan session {} cancelled", session.id);
            self.shared.emit(ScanEvent::Cancelled {
                session: session.id,
            });
        }
    }

    /// A copy of the current scan state.
    pub fn state(&self) -> ScanState {
        self.shared.state.read().clone()
    }

    /// The authoritative snapshot of the last completed session.
    pub fn snapshot(&self) -> Arc<Vec<LinkEntry>> {
        self.shared.state.read().entries.clone()
    }

    /// Look up a link by path among known entries: the published snapshot,
    /// then entries streamed by the running session.
    pub fn find(&self, path: &str) -> Option<LinkEntry> {
        let wanted = paths::key(path);
        let state = self.shared.state.read();
        state
            .entries
            .iter()
            .chain(state.streamed.iter())
            .find(|entry| paths::key(&entry.path) == wanted)
            .cloned()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Receiver for scan notifications. All clones share one queue.
    pub fn events(&self) -> Receiver<ScanEvent> {
        self.shared.events_rx.clone()
    }

    /// Block until `session` reaches a terminal phase or `timeout` elapses.
    ///
    /// A session that was superseded by a newer one reports `Cancelled`.
    /// Returns `None` on timeout.
    pub fn wait_for(&self, session: SessionId, timeout: Duration) -> Option<ScanPhase> {
        let deadline = Instant::now() + timeout;
        let mut generation = self.shared.generation.lock();
        loop {
            {
                let state = self.shared.state.read();
                match state.session {
                    Some(current) if current == session && state.phase.is_terminal() => {
                        return Some(state.phase);
                    }
                    Some(current) if current > session => return Some(ScanPhase::Cancelled),
                    _ => {}
                }
            }
            if self
                .shared
                .changed
                .wait_until(&mut generation, deadline)
                .timed_out()
            {
                return None;
            }
        }
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        if let Some(session) = self.active.lock().take() {
            session.cancel();
        }
    }
}

/// Everything one session thread needs.
struct SessionRun {
    id: SessionId,
    volume: String,
    cancel_flag: Arc<AtomicBool>,
    enumerator: Arc<dyn LinkEnumerator>,
    resolver: Arc<dyn TargetResolver>,
    shared: Arc<Shared>,
    flush_interval: Duration,
}

/// How the streaming phase ended.
enum StreamOutcome {
    Finished(ScanStrategy),
    Failed(String),
    Cancelled,
}

impl SessionRun {
    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    fn run(self) {
        let start = Instant::now();
        let mut raw_entries: Vec<RawEntry> = Vec::new();

        match self.stream(&mut raw_entries) {
            StreamOutcome::Finished(strategy) => {
                info!(
                    "Session {} enumerated {} links via {} in {:.2}s",
                    self.id,
                    raw_entries.len(),
                    strategy.label(),
                    start.elapsed().as_secs_f64()
                );
                self.finalize(strategy, raw_entries, start);
            }
            StreamOutcome::Failed(message) => self.fail(message),
            StreamOutcome::Cancelled => self.discard(),
        }
    }

    /// Consume the enumerator's messages until it finishes, validating each
    /// batch and flushing to the streamed view on every tick.
    fn stream(&self, raw_entries: &mut Vec<RawEntry>) -> StreamOutcome {
        let (tx, rx) = crossbeam_channel::bounded(enumerator::SINK_CHANNEL_CAPACITY);
        let sink = ScanSink::new(self.id, tx, self.cancel_flag.clone());

        let enumerator = self.enumerator.clone();
        let volume = self.volume.clone();
        let spawned = thread::Builder::new()
            .name("linksleuth-enum".into())
            .spawn(move || {
                let result = enumerator
                    .enumerate(&volume, &sink)
                    .map_err(|err| err.to_string());
                sink.finish(result);
            });
        if let Err(err) = spawned {
            return StreamOutcome::Failed(format!("Failed to spawn enumeration thread: {err}"));
        }

        let ticker = crossbeam_channel::tick(self.flush_interval);
        let mut seen: HashSet<String> = HashSet::new();
        let mut buffer: Vec<LinkEntry> = Vec::new();

        loop {
            select! {
                recv(rx) -> message => {
                    let Ok(message) = message else {
                        return StreamOutcome::Failed(
                            "Enumeration stopped without reporting a result".to_string(),
                        );
                    };
                    if message.session != self.id {
                        debug!("Dropping message from stale session {}", message.session);
                        continue;
                    }
                    if self.is_cancelled() {
                        return StreamOutcome::Cancelled;
                    }
                    match message.payload {
                        SinkPayload::Batch(batch) => {
                            let fresh: Vec<RawEntry> = batch
                                .into_iter()
                                .filter(|raw| seen.insert(paths::key(&raw.path)))
                                .collect();
                            if fresh.is_empty() {
                                continue;
                            }
                            buffer.extend(validate_batch(fresh.clone(), self.resolver.as_ref()));
                            raw_entries.extend(fresh);
                        }
                        SinkPayload::Progress(progress) => {
                            let applied = self.shared.update_if_live(self.id, |state| {
                                state.progress = Some(progress.clone());
                            });
                            if applied {
                                self.shared.emit(ScanEvent::Progress {
                                    session: self.id,
                                    progress,
                                });
                            }
                        }
                        SinkPayload::Finished(Ok(strategy)) => {
                            self.flush(&mut buffer);
                            return StreamOutcome::Finished(strategy);
                        }
                        SinkPayload::Finished(Err(message)) => {
                            if self.is_cancelled() {
                                return StreamOutcome::Cancelled;
                            }
                            return StreamOutcome::Failed(message);
                        }
                    }
                }
                recv(ticker) -> _ => {
                    if self.is_cancelled() {
                        return StreamOutcome::Cancelled;
                    }
                    self.flush(&mut buffer);
                }
            }
        }
    }

    /// Move buffered entries into the streamed view.
    fn flush(&self, buffer: &mut Vec<LinkEntry>) {
        if buffer.is_empty() {
            return;
        }
        let mut streamed_len = 0;
        let applied = self.shared.update_if_live(self.id, |state| {
            Arc::make_mut(&mut state.streamed).append(buffer);
            streamed_len = state.streamed.len();
        });
        if applied {
            self.shared.emit(ScanEvent::Flushed {
                session: self.id,
                streamed: streamed_len,
            });
        } else {
            buffer.clear();
        }
    }

    /// Validate the complete set and publish it as the snapshot.
    fn finalize(&self, strategy: ScanStrategy, raw_entries: Vec<RawEntry>, start: Instant) {
        let total = raw_entries.len();
        let entered = self.shared.update_if_live(self.id, |state| {
            state.phase = ScanPhase::Validating;
        });
        if !entered {
            return;
        }
        self.shared.emit(ScanEvent::Validating {
            session: self.id,
            entries: total,
        });

        let mut validated = Vec::with_capacity(total);
        for chunk in raw_entries.chunks(VALIDATION_CHUNK) {
            if self.is_cancelled() {
                self.discard();
                return;
            }
            validated.extend(validate_batch(chunk.to_vec(), self.resolver.as_ref()));
        }
        validated.sort_by(|a, b| paths::key(&a.path).cmp(&paths::key(&b.path)));

        let entries = Arc::new(validated);
        let mut published = false;
        self.shared.update_if_live(self.id, |state| {
            // Checked under the write lock so a concurrent cancel cannot
            // interleave with the publish.
            if self.cancel_flag.load(Ordering::Relaxed) {
                return;
            }
            state.phase = ScanPhase::Completed;
            state.strategy = Some(strategy);
            state.entries = entries.clone();
            state.streamed = entries.clone();
            state.error = None;
            published = true;
        });

        if published {
            let broken = entries.iter().filter(|e| e.status.is_broken()).count();
            info!(
                "Scan session {} complete: {} links ({} broken) in {:.2}s",
                self.id,
                total,
                broken,
                start.elapsed().as_secs_f64()
            );
            self.shared.emit(ScanEvent::Completed {
                session: self.id,
                strategy,
                entries: total,
            });
        } else {
            self.discard();
        }
    }

    /// Record an enumeration failure. The published snapshot is kept.
    fn fail(&self, message: String) {
        warn!("Scan session {} failed: {message}", self.id);
        let applied = self.shared.update_if_live(self.id, |state| {
            state.phase = ScanPhase::Failed;
            state.error = Some(message.clone());
        });
        if applied {
            self.shared.emit(ScanEvent::Failed {
                session: self.id,
                message,
            });
        }
    }

    /// Drop everything this session produced.
    fn discard(&self) {
        let applied = self.shared.update_if_live(self.id, |state| {
            state.phase = ScanPhase::Cancelled;
            state.streamed = Arc::new(Vec::new());
            state.progress = None;
        });
        if applied {
            info!("Scan session {} cancelled", self.id);
            self.shared.emit(ScanEvent::Cancelled { session: self.id });
        } else {
            debug!("Scan session {} superseded, results discarded", self.id);
        }
    }
}
