/// Enumeration contract between the coordinator and the scan strategies.
///
/// Enumerators push batches of raw entries into a [`ScanSink`]. Every
/// message is tagged with the session id so the coordinator can discard
/// anything a superseded session emits after it was cancelled.
use super::progress::{ScanProgress, ScanStrategy};
use super::session::SessionId;
use crate::error::ScanError;
use crate::model::RawEntry;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum number of messages queued between an enumerator and the
/// coordinator. A full channel blocks `send_batch` (back-pressure) and
/// drops progress updates.
pub const SINK_CHANNEL_CAPACITY: usize = 64;

/// Produces the raw links of a volume.
pub trait LinkEnumerator: Send + Sync {
    /// Stream every link on `volume` into `sink` and report the strategy
    /// that ran. Implementations should poll [`ScanSink::is_cancelled`] and
    /// stop early; an early return after cancellation is not an error.
    fn enumerate(&self, volume: &str, sink: &ScanSink) -> Result<ScanStrategy, ScanError>;
}

/// What an enumerator pushed.
#[derive(Debug)]
pub enum SinkPayload {
    Batch(Vec<RawEntry>),
    Progress(ScanProgress),
    /// Sent once by the enumeration thread after `enumerate` returns.
    Finished(Result<ScanStrategy, String>),
}

/// A payload tagged with the session that produced it.
#[derive(Debug)]
pub struct SinkMessage {
    pub session: SessionId,
    pub payload: SinkPayload,
}

/// Push side of the enumerator → coordinator channel.
#[derive(Clone)]
pub struct ScanSink {
    session: SessionId,
    tx: Sender<SinkMessage>,
    cancel_flag: Arc<AtomicBool>,
}

impl ScanSink {
    pub(crate) fn new(
        session: SessionId,
        tx: Sender<SinkMessage>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session,
            tx,
            cancel_flag,
        }
    }

    /// A sink not attached to any coordinator, for driving an enumerator
    /// directly. Returns the receiving end and the cancellation flag.
    pub fn standalone() -> (Self, Receiver<SinkMessage>, Arc<AtomicBool>) {
        let (tx, rx) = crossbeam_channel::bounded(SINK_CHANNEL_CAPACITY);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        (Self::new(SessionId(0), tx, cancel_flag.clone()), rx, cancel_flag)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Push a batch, blocking while the channel is full.
    ///
    /// Returns `false` when the enumerator should stop: the session was
    /// cancelled or the coordinator is gone.
    pub fn send_batch(&self, batch: Vec<RawEntry>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if batch.is_empty() {
            return true;
        }
        self.tx
            .send(SinkMessage {
                session: self.session,
                payload: SinkPayload::Batch(batch),
            })
            .is_ok()
    }

    /// Report progress. Dropped silently when the channel is full.
    pub fn progress(&self, progress: ScanProgress) {
        match self.tx.try_send(SinkMessage {
            session: self.session,
            payload: SinkPayload::Progress(progress),
        }) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub(crate) fn finish(&self, result: Result<ScanStrategy, String>) {
        let _ = self.tx.send(SinkMessage {
            session: self.session,
            payload: SinkPayload::Finished(result),
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }
}

/// Two-tier strategy selection: the fast privileged enumerator when the
/// process is elevated, the fallback walker otherwise or when the fast one
/// fails.
pub struct TieredEnumerator {
    fast: Option<Arc<dyn LinkEnumerator>>,
    fallback: Arc<dyn LinkEnumerator>,
    elevated: bool,
}

impl TieredEnumerator {
    pub fn new(
        fast: Option<Arc<dyn LinkEnumerator>>,
        fallback: Arc<dyn LinkEnumerator>,
        elevated: bool,
    ) -> Self {
        Self {
            fast,
            fallback,
            elevated,
        }
    }

    /// The platform's default tiers: USN reader + walker on Windows, the
    /// walker alone elsewhere.
    pub fn for_platform(excluded_paths: Vec<String>) -> Self {
        let walker: Arc<dyn LinkEnumerator> =
            Arc::new(super::walk::WalkEnumerator::new(excluded_paths.clone()));

        #[cfg(windows)]
        let fast: Option<Arc<dyn LinkEnumerator>> =
            Some(Arc::new(super::usn::UsnEnumerator::new(excluded_paths)));
        #[cfg(not(windows))]
        let fast: Option<Arc<dyn LinkEnumerator>> = {
            let _ = excluded_paths;
            None
        };

        Self::new(fast, walker, crate::platform::is_elevated())
    }
}

impl LinkEnumerator for TieredEnumerator {
    fn enumerate(&self, volume: &str, sink: &ScanSink) -> Result<ScanStrategy, ScanError> {
        if let Some(fast) = self.fast.as_ref().filter(|_| self.elevated) {
            info!("Trying fast enumeration of {volume}");
            match fast.enumerate(volume, sink) {
                Ok(strategy) => return Ok(strategy),
                Err(err) if sink.is_cancelled() => return Err(err),
                Err(err) => warn!("Fast enumeration failed ({err}), falling back to directory walk"),
            }
        }
        info!("Using directory walk for {volume}");
        self.fallback.enumerate(volume, sink)
    }
}
