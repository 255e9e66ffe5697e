/// Action history - paginated reads of the action log and "undo last".
///
/// Loads run on background threads and are tagged with a sequence number:
/// only the most recently issued load may replace the current page, so a
/// slow early request can never overwrite a fresher one. Undo is serialised
/// by a lock; two concurrent calls can never reverse the same action twice.
pub mod store;

pub use store::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore, MAX_HISTORY_LIMIT};

use crate::error::{HistoryError, MutationError, UndoError, ValidationError};
use crate::model::{ActionDraft, ActionRecord, ActionType};
use crate::mutation::{CreateRequest, LinkInfo, LinkMutation, MutationEngine, MutationReport};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Page size used until the first explicit load.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// The currently loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryView {
    pub records: Vec<ActionRecord>,
    pub limit: usize,
    pub offset: usize,
    /// Sequence number of the load that produced this view; 0 before any.
    pub seq: u64,
    /// Message of the last failed load, if the latest load failed.
    pub error: Option<String>,
}

impl Default for HistoryView {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            seq: 0,
            error: None,
        }
    }
}

/// What happened to a finished load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer load was issued before this one resolved.
    Discarded,
}

/// Handle to an in-flight load.
#[derive(Debug)]
pub struct LoadHandle {
    pub seq: u64,
    done: Receiver<LoadOutcome>,
}

impl LoadHandle {
    /// Block until the load resolves. `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<LoadOutcome> {
        self.done.recv_timeout(timeout).ok()
    }
}

/// Result of [`ActionHistory::undo_last`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Nothing eligible: not on the first page, the newest record is a
    /// successful undo, or no successful action remains.
    NothingToUndo,
    Undone {
        reversed: ActionRecord,
        report: MutationReport,
    },
}

struct Shared {
    view: RwLock<HistoryView>,
    issued: AtomicU64,
    loads_in_flight: AtomicUsize,
}

pub struct ActionHistory {
    store: Arc<dyn HistoryStore>,
    engine: Arc<MutationEngine>,
    shared: Arc<Shared>,
    undo_lock: Mutex<()>,
    undo_in_flight: AtomicBool,
}

impl ActionHistory {
    pub fn new(store: Arc<dyn HistoryStore>, engine: Arc<MutationEngine>) -> Self {
        Self {
            store,
            engine,
            shared: Arc::new(Shared {
                view: RwLock::new(HistoryView::default()),
                issued: AtomicU64::new(0),
                loads_in_flight: AtomicUsize::new(0),
            }),
            undo_lock: Mutex::new(()),
            undo_in_flight: AtomicBool::new(false),
        }
    }

    /// Load a page in the background.
    pub fn load(&self, limit: usize, offset: usize) -> Result<LoadHandle, HistoryError> {
        let seq = self.shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let (done_tx, done) = crossbeam_channel::bounded(1);

        let store = self.store.clone();
        let shared = self.shared.clone();
        shared.loads_in_flight.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("linksleuth-history".into())
            .spawn(move || {
                let result = store.read(limit, offset);
                let outcome = shared.apply(seq, limit, offset, result);
                shared.loads_in_flight.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(outcome);
            });

        if let Err(err) = spawned {
            self.shared.loads_in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(HistoryError::Unavailable(format!(
                "failed to spawn history loader: {err}"
            )));
        }
        Ok(LoadHandle { seq, done })
    }

    /// A copy of the current page.
    pub fn view(&self) -> HistoryView {
        self.shared.view.read().clone()
    }

    /// `true` while a load or an undo is running.
    pub fn is_busy(&self) -> bool {
        self.shared.loads_in_flight.load(Ordering::SeqCst) > 0
            || self.undo_in_flight.load(Ordering::SeqCst)
    }

    /// Reverse the most recent successful action.
    ///
    /// Only available on the first page. Waits for any undo already running;
    /// the waiting call then sees that undo's record and does nothing.
    pub fn undo_last(&self) -> Result<UndoOutcome, UndoError> {
        let _serial = self.undo_lock.lock();
        self.undo_in_flight.store(true, Ordering::SeqCst);
        let result = self.undo_locked();
        self.undo_in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn undo_locked(&self) -> Result<UndoOutcome, UndoError> {
        let (limit, offset) = {
            let view = self.shared.view.read();
            (view.limit, view.offset)
        };
        if offset != 0 {
            debug!("Undo ignored: history is not on the first page");
            return Ok(UndoOutcome::NothingToUndo);
        }

        let page = self.store.read(limit.max(1), 0)?;
        let Some(candidate) = undo_candidate(&page) else {
            return Ok(UndoOutcome::NothingToUndo);
        };
        let mutation = inverse_of(candidate)?;
        info!(
            "Undoing {} #{} on {}",
            candidate.action_type.label(),
            candidate.id,
            candidate.link_path
        );

        let result = self.engine.apply(mutation, Some(candidate.id));
        if let Err(MutationError::Invalid(reason)) = &result {
            self.record_rejected_undo(candidate, reason);
        }
        if let Err(err) = self.load(limit, 0) {
            warn!("History reload after undo failed: {err}");
        }

        match result {
            Ok(report) => Ok(UndoOutcome::Undone {
                reversed: candidate.clone(),
                report,
            }),
            Err(err) => Err(UndoError::Failed(err)),
        }
    }

    /// The engine records OS failures itself but not validation failures.
    /// An undo that never reached the OS still leaves a failed `Undo` row.
    fn record_rejected_undo(&self, candidate: &ActionRecord, reason: &ValidationError) {
        warn!("Undo of #{} rejected: {reason}", candidate.id);
        let draft = ActionDraft {
            action_type: ActionType::Undo,
            link_path: candidate.link_path.clone(),
            link_type: candidate.link_type,
            target_old: candidate.target_new.clone(),
            target_new: candidate.target_old.clone(),
            target_is_dir: candidate.target_is_dir,
            undoes: Some(candidate.id),
            success: false,
            error_msg: Some(reason.to_string()),
        };
        if let Err(err) = self.store.append(draft) {
            warn!("Could not record the rejected undo of #{}: {err}", candidate.id);
        }
    }
}

impl Shared {
    fn apply(
        &self,
        seq: u64,
        limit: usize,
        offset: usize,
        result: Result<Vec<ActionRecord>, HistoryError>,
    ) -> LoadOutcome {
        let mut view = self.view.write();
        if seq != self.issued.load(Ordering::SeqCst) {
            debug!("Discarding stale history load #{seq}");
            return LoadOutcome::Discarded;
        }
        match result {
            Ok(records) => {
                *view = HistoryView {
                    records,
                    limit,
                    offset,
                    seq,
                    error: None,
                };
            }
            Err(err) => {
                // Records, limit and offset keep describing the last page
                // that actually loaded.
                warn!("History load #{seq} failed: {err}");
                view.seq = seq;
                view.error = Some(err.to_string());
            }
        }
        LoadOutcome::Applied
    }
}

/// The record `undo_last` would reverse, if any.
///
/// Nothing when the newest record is a successful undo. Otherwise the
/// newest successful non-undo record that no successful undo has already
/// reversed. Failed undo rows never block a retry.
pub fn undo_candidate(page: &[ActionRecord]) -> Option<&ActionRecord> {
    let newest = page.first()?;
    if newest.action_type == ActionType::Undo && newest.success {
        return None;
    }
    let reversed: HashSet<u64> = page
        .iter()
        .filter(|record| record.action_type == ActionType::Undo && record.success)
        .filter_map(|record| record.undoes)
        .collect();
    page.iter().find(|record| {
        record.success && record.action_type != ActionType::Undo && !reversed.contains(&record.id)
    })
}

/// The mutation that reverses `record`.
fn inverse_of(record: &ActionRecord) -> Result<LinkMutation, UndoError> {
    let irreversible = || UndoError::Irreversible {
        action_id: record.id,
    };
    match record.action_type {
        ActionType::Create => Ok(LinkMutation::Delete {
            path: record.link_path.clone(),
            known: Some(LinkInfo {
                link_type: record.link_type,
                target: record.target_new.clone().ok_or_else(irreversible)?,
                target_is_dir: record.target_is_dir,
            }),
        }),
        ActionType::Delete => Ok(LinkMutation::Create(CreateRequest {
            link_path: record.link_path.clone(),
            target: record.target_old.clone().ok_or_else(irreversible)?,
            link_type: record.link_type,
            target_is_dir: record.target_is_dir,
        })),
        ActionType::Retarget => Ok(LinkMutation::Retarget {
            path: record.link_path.clone(),
            new_target: record.target_old.clone().ok_or_else(irreversible)?,
            known: Some(LinkInfo {
                link_type: record.link_type,
                target: record.target_new.clone().ok_or_else(irreversible)?,
                target_is_dir: record.target_is_dir,
            }),
        }),
        ActionType::Undo => Err(irreversible()),
    }
}
