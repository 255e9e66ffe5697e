/// Scan progress reporting - lightweight messages about a running session.
///
/// Progress is advisory: it may be dropped or coalesced at any point and is
/// never needed for the correctness of the final snapshot.
use super::session::SessionId;
use serde::{Deserialize, Serialize};

/// Which enumeration strategy produced a session's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStrategy {
    /// Privileged fast path: NTFS MFT records via `FSCTL_ENUM_USN_DATA`.
    UsnJournal,
    /// Fallback: recursive parallel directory walk.
    DirectoryWalk,
}

impl ScanStrategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::UsnJournal => "USN journal",
            Self::DirectoryWalk => "Directory walk",
        }
    }
}

/// Running totals reported by an enumerator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Filesystem objects examined so far.
    pub scanned: u64,
    /// Links found so far.
    pub found: u64,
    pub current_path: String,
}

/// Notifications published by the coordinator for observers.
///
/// Sent with `try_send`: an observer that stops draining the channel misses
/// events but never stalls a scan. [`ScanState`](super::ScanState) is the
/// source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Started {
        session: SessionId,
        volume: String,
    },
    Progress {
        session: SessionId,
        progress: ScanProgress,
    },
    /// Buffered entries were flushed to the streamed view.
    Flushed {
        session: SessionId,
        streamed: usize,
    },
    Validating {
        session: SessionId,
        entries: usize,
    },
    Completed {
        session: SessionId,
        strategy: ScanStrategy,
        entries: usize,
    },
    Failed {
        session: SessionId,
        message: String,
    },
    Cancelled {
        session: SessionId,
    },
}
