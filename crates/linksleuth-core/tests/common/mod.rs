//! Shared fakes for the integration tests.
//!
//! [`MemoryVolume`] is an in-memory NTFS stand-in that plays all three
//! filesystem roles: it enumerates its links, resolves their targets and
//! applies mutations. Paths use NTFS spelling (`C:\...`) on every host.
#![allow(dead_code)]

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use linksleuth_core::error::{HistoryError, OperatorError, ScanError};
use linksleuth_core::history::{HistoryStore, MemoryHistoryStore};
use linksleuth_core::model::{paths, ActionDraft, ActionRecord, LinkType, RawEntry};
use linksleuth_core::mutation::{CreateRequest, LinkInfo, LinkOperator};
use linksleuth_core::scanner::{
    LinkEnumerator, ScanCoordinator, ScanPhase, ScanProgress, ScanSink, ScanStrategy,
};
use linksleuth_core::validator::{ResolveError, TargetResolver};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct FakeLink {
    path: String,
    target: String,
    link_type: LinkType,
    target_is_dir: bool,
}

#[derive(Default)]
pub struct MemoryVolume {
    links: Mutex<BTreeMap<String, FakeLink>>,
    objects: Mutex<HashSet<String>>,
    denied: Mutex<HashSet<String>>,
    fail_next: Mutex<Option<String>>,
    operator_calls: AtomicUsize,
}

impl MemoryVolume {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A plain file or directory that links can point at.
    pub fn add_object(&self, path: &str) {
        self.objects.lock().insert(paths::key(path));
    }

    pub fn add_link(&self, path: &str, target: &str, link_type: LinkType) {
        self.links.lock().insert(
            paths::key(path),
            FakeLink {
                path: path.to_string(),
                target: target.to_string(),
                link_type,
                target_is_dir: link_type == LinkType::Junction,
            },
        );
    }

    /// Resolution of anything under `path` fails with access denied.
    pub fn deny(&self, path: &str) {
        self.denied.lock().insert(paths::key(path));
    }

    /// Make the next operator call fail with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    pub fn operator_calls(&self) -> usize {
        self.operator_calls.load(Ordering::SeqCst)
    }

    pub fn link(&self, path: &str) -> Option<(String, LinkType)> {
        self.links
            .lock()
            .get(&paths::key(path))
            .map(|link| (link.target.clone(), link.link_type))
    }

    fn begin_call(&self) -> Result<(), OperatorError> {
        self.operator_calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_next.lock().take() {
            Some(message) => Err(OperatorError::new(message)),
            None => Ok(()),
        }
    }
}

impl LinkEnumerator for MemoryVolume {
    fn enumerate(&self, volume: &str, sink: &ScanSink) -> Result<ScanStrategy, ScanError> {
        let wanted = paths::volume_of(volume);
        let raw: Vec<RawEntry> = self
            .links
            .lock()
            .values()
            .filter(|link| paths::volume_of(&link.path) == wanted)
            .map(|link| RawEntry::new(link.path.clone(), link.target.clone(), link.link_type))
            .collect();

        for (index, batch) in raw.chunks(2).enumerate() {
            if !sink.send_batch(batch.to_vec()) {
                break;
            }
            sink.progress(ScanProgress {
                scanned: (index as u64 + 1) * 2,
                found: (index as u64 + 1) * 2,
                current_path: batch[0].path.clone(),
            });
        }
        Ok(ScanStrategy::DirectoryWalk)
    }
}

impl TargetResolver for MemoryVolume {
    fn resolve(
        &self,
        path: &str,
        target: &str,
        link_type: LinkType,
    ) -> Result<String, ResolveError> {
        if link_type == LinkType::Hardlink {
            return if self.links.lock().contains_key(&paths::key(path)) {
                Ok(path.to_string())
            } else {
                Err(ResolveError::NotFound)
            };
        }

        let denied: Vec<String> = self.denied.lock().iter().cloned().collect();
        let mut current = target.to_string();
        for _ in 0..32 {
            let key = paths::key(&current);
            if paths::is_excluded(&current, &denied) {
                return Err(ResolveError::AccessDenied);
            }
            if self.objects.lock().contains(&key) {
                return Ok(current);
            }
            match self.links.lock().get(&key) {
                Some(next) if next.link_type != LinkType::Hardlink => current = next.target.clone(),
                Some(_) => return Ok(current),
                None => return Err(ResolveError::NotFound),
            }
        }
        Err(ResolveError::Other("too many levels of links".to_string()))
    }
}

impl LinkOperator for MemoryVolume {
    fn create(&self, request: &CreateRequest) -> Result<(), OperatorError> {
        self.begin_call()?;
        let key = paths::key(&request.link_path);
        let mut links = self.links.lock();
        if links.contains_key(&key) || self.objects.lock().contains(&key) {
            return Err(OperatorError::new("Link path already exists"));
        }
        links.insert(
            key,
            FakeLink {
                path: request.link_path.clone(),
                target: request.target.clone(),
                link_type: request.link_type,
                target_is_dir: request.target_is_dir,
            },
        );
        Ok(())
    }

    fn delete(&self, path: &str, _link_type: LinkType) -> Result<(), OperatorError> {
        self.begin_call()?;
        self.links
            .lock()
            .remove(&paths::key(path))
            .map(|_| ())
            .ok_or_else(|| OperatorError::new("The system cannot find the file specified."))
    }

    fn retarget(
        &self,
        path: &str,
        _current: &LinkInfo,
        new_target: &str,
    ) -> Result<(), OperatorError> {
        self.begin_call()?;
        match self.links.lock().get_mut(&paths::key(path)) {
            Some(link) => {
                link.target = new_target.to_string();
                Ok(())
            }
            None => Err(OperatorError::new("The system cannot find the file specified.")),
        }
    }

    fn inspect(&self, path: &str) -> Result<LinkInfo, OperatorError> {
        self.links
            .lock()
            .get(&paths::key(path))
            .map(|link| LinkInfo {
                link_type: link.link_type,
                target: link.target.clone(),
                target_is_dir: link.target_is_dir,
            })
            .ok_or_else(|| OperatorError::new("Path is not a recognized link type"))
    }
}

/// What a [`ScriptedEnumerator`] does for one volume.
#[derive(Default)]
pub struct Script {
    /// Sent as soon as enumeration starts.
    pub before: Vec<RawEntry>,
    /// When set, enumeration blocks here until the sender side is used or
    /// dropped. Cancellation does not end the wait.
    pub gate: Option<Receiver<()>>,
    /// Sent after the gate opens (refused by the sink if cancelled).
    pub after: Vec<RawEntry>,
    /// Fail after the gate instead of succeeding.
    pub fail: Option<String>,
}

/// Enumerator that follows a per-volume script and reports each finished
/// enumeration on `finished`.
pub struct ScriptedEnumerator {
    scripts: HashMap<String, Script>,
    finished: Sender<String>,
}

impl ScriptedEnumerator {
    pub fn new(scripts: Vec<(&str, Script)>) -> (Self, Receiver<String>) {
        let (finished, finished_rx) = crossbeam_channel::unbounded();
        let scripts = scripts
            .into_iter()
            .map(|(volume, script)| (volume.to_string(), script))
            .collect();
        (Self { scripts, finished }, finished_rx)
    }
}

impl LinkEnumerator for ScriptedEnumerator {
    fn enumerate(&self, volume: &str, sink: &ScanSink) -> Result<ScanStrategy, ScanError> {
        let script = self
            .scripts
            .get(volume)
            .ok_or_else(|| ScanError::Enumeration(format!("no script for {volume}")))?;

        sink.send_batch(script.before.clone());
        if let Some(gate) = &script.gate {
            loop {
                match gate.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                }
            }
        }
        sink.send_batch(script.after.clone());
        let _ = self.finished.send(volume.to_string());

        match &script.fail {
            Some(message) => Err(ScanError::Enumeration(message.clone())),
            None => Ok(ScanStrategy::UsnJournal),
        }
    }
}

/// A store whose reads at offset 0 block until released.
pub struct GatedStore {
    inner: MemoryHistoryStore,
    gate: Mutex<Option<Receiver<()>>>,
}

impl GatedStore {
    pub fn new(gate: Receiver<()>) -> Self {
        Self {
            inner: MemoryHistoryStore::new(),
            gate: Mutex::new(Some(gate)),
        }
    }
}

impl HistoryStore for GatedStore {
    fn append(&self, draft: ActionDraft) -> Result<ActionRecord, HistoryError> {
        self.inner.append(draft)
    }

    fn read(&self, limit: usize, offset: usize) -> Result<Vec<ActionRecord>, HistoryError> {
        if offset == 0 {
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(TIMEOUT);
            }
        }
        self.inner.read(limit, offset)
    }
}

/// A store that cannot be written.
pub struct BrokenStore;

impl HistoryStore for BrokenStore {
    fn append(&self, _draft: ActionDraft) -> Result<ActionRecord, HistoryError> {
        Err(HistoryError::Unavailable("disk full".to_string()))
    }

    fn read(&self, _limit: usize, _offset: usize) -> Result<Vec<ActionRecord>, HistoryError> {
        Err(HistoryError::Unavailable("disk full".to_string()))
    }
}

/// A memory store whose reads fail while `failing` is set.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryHistoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl HistoryStore for FlakyStore {
    fn append(&self, draft: ActionDraft) -> Result<ActionRecord, HistoryError> {
        self.inner.append(draft)
    }

    fn read(&self, limit: usize, offset: usize) -> Result<Vec<ActionRecord>, HistoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HistoryError::Unavailable("share went offline".to_string()));
        }
        self.inner.read(limit, offset)
    }
}

pub fn raw(path: &str, target: &str, link_type: LinkType) -> RawEntry {
    RawEntry::new(path, target, link_type)
}

/// Wait until the latest session has finished and return its phase.
pub fn settle(coordinator: &ScanCoordinator) -> ScanPhase {
    let session = coordinator
        .state()
        .session
        .expect("a scan should have been started");
    coordinator
        .wait_for(session, TIMEOUT)
        .expect("scan did not finish in time")
}

/// Poll `condition` until it holds or the timeout passes.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
