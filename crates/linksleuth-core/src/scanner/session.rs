/// Scan sessions and the observable scan state.
use super::progress::{ScanProgress, ScanStrategy};
use crate::model::LinkEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Monotonically increasing scan session id. Later ids supersede earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of one session.
///
/// `Idle -> Scanning -> Validating -> {Completed, Cancelled, Failed}`.
/// Terminal phases are never left; a new scan always gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    Idle,
    /// Enumeration running; batches stream into `ScanState::streamed`.
    Scanning,
    /// Enumeration finished; the full set is being validated.
    Validating,
    Completed,
    Cancelled,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Scanning | Self::Validating)
    }
}

/// Handle to a started session.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub id: SessionId,
    pub volume: String,
    cancel_flag: Arc<AtomicBool>,
}

impl ScanSession {
    pub(crate) fn new(id: SessionId, volume: String, cancel_flag: Arc<AtomicBool>) -> Self {
        Self {
            id,
            volume,
            cancel_flag,
        }
    }

    /// Request this session to stop. Non-blocking.
    pub(crate) fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }
}

/// Everything an observer can see about scanning.
///
/// Written only by the active session (plus the reset in `start_scan` and
/// `cancel`). Cloning is cheap: entry lists are shared behind `Arc`.
#[derive(Debug, Clone)]
pub struct ScanState {
    /// Session that owns this state. `None` before the first scan.
    pub session: Option<SessionId>,
    pub volume: Option<String>,
    pub phase: ScanPhase,
    /// Strategy of the last completed session.
    pub strategy: Option<ScanStrategy>,
    /// Authoritative snapshot: replaced only when a session completes,
    /// cleared when a new one starts.
    pub entries: Arc<Vec<LinkEntry>>,
    /// Provisional entries flushed while the session runs.
    pub streamed: Arc<Vec<LinkEntry>>,
    pub progress: Option<ScanProgress>,
    pub error: Option<String>,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            session: None,
            volume: None,
            phase: ScanPhase::Idle,
            strategy: None,
            entries: Arc::new(Vec::new()),
            streamed: Arc::new(Vec::new()),
            progress: None,
            error: None,
        }
    }
}

impl ScanState {
    /// `true` while `session` is the owner and has not reached a terminal phase.
    pub(crate) fn is_live(&self, session: SessionId) -> bool {
        self.session == Some(session) && self.phase.is_running()
    }

    /// Reset for a freshly started session. Clears entries to avoid showing
    /// stale data mixed with the new session's results.
    pub(crate) fn reset_for(&mut self, session: SessionId, volume: &str) {
        self.session = Some(session);
        self.volume = Some(volume.to_string());
        self.phase = ScanPhase::Scanning;
        self.strategy = None;
        self.entries = Arc::new(Vec::new());
        self.streamed = Arc::new(Vec::new());
        self.progress = None;
        self.error = None;
    }
}
