/// Parallel directory walker using `jwalk` - the Tier 2 (fallback) enumerator.
///
/// Needs no admin rights. Symlinks and junctions are read with `read_link`;
/// regular files with more than one name are reported as hardlinks, paired
/// with another name of the same file record where the walk sees one.
///
/// Entries are accumulated locally and pushed to the sink in batches of
/// [`BATCH_SIZE`], so the coordinator receives a few hundred messages for a
/// large volume rather than one per link.
use super::enumerator::{LinkEnumerator, ScanSink};
use super::progress::{ScanProgress, ScanStrategy};
use crate::error::ScanError;
use crate::model::{paths, LinkType, RawEntry};
use crate::platform::{file_identity, symlink_kind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Number of links to accumulate before pushing a batch.
pub const BATCH_SIZE: usize = 256;

/// Report progress every this many filesystem objects.
const PROGRESS_EVERY: u64 = 500;

/// Check for cancellation every this many filesystem objects.
const CANCEL_CHECK_EVERY: u64 = 1_000;

/// Directory-walk enumerator.
#[derive(Debug, Clone, Default)]
pub struct WalkEnumerator {
    excluded: Vec<String>,
}

impl WalkEnumerator {
    pub fn new(excluded: Vec<String>) -> Self {
        Self { excluded }
    }
}

impl LinkEnumerator for WalkEnumerator {
    /// `volume` is a drive (`C`, `C:`, `C:\`) or, for a partial scan, any
    /// directory path.
    fn enumerate(&self, volume: &str, sink: &ScanSink) -> Result<ScanStrategy, ScanError> {
        let root = walk_root(volume);
        if !root.is_dir() {
            return Err(ScanError::Enumeration(format!(
                "{} is not an accessible directory",
                root.display()
            )));
        }

        let start = Instant::now();
        info!("Walking {}", root.display());

        let excluded = self.excluded.clone();
        let walker = jwalk::WalkDir::new(&root)
            .skip_hidden(false)
            .follow_links(false)
            .parallelism(jwalk::Parallelism::RayonNewPool(num_cpus::get()))
            .process_read_dir(move |_depth, _path, _state, children| {
                // Prune excluded subtrees before jwalk descends into them.
                children.retain(|child| match child {
                    Ok(entry) => {
                        !paths::is_excluded(&entry.path().to_string_lossy(), &excluded)
                    }
                    Err(_) => true,
                });
            });

        let mut pairing = HardlinkPairing::default();
        let mut batch: Vec<RawEntry> = Vec::with_capacity(BATCH_SIZE);
        let mut scanned: u64 = 0;
        let mut found: u64 = 0;
        let mut error_count: u64 = 0;

        for entry_result in walker {
            scanned += 1;
            if scanned.is_multiple_of(CANCEL_CHECK_EVERY) && sink.is_cancelled() {
                debug!("Walk of {} cancelled after {scanned} objects", root.display());
                return Ok(ScanStrategy::DirectoryWalk);
            }

            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    // Typically access denied on a directory read.
                    error_count += 1;
                    debug!("Walk error: {err}");
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = std::fs::read_link(&path)
                    .map(|target| paths::display_form(&target.to_string_lossy()))
                    .unwrap_or_default();
                batch.push(RawEntry::new(
                    path_text(&path),
                    target,
                    symlink_kind(&path),
                ));
                found += 1;
            } else if file_type.is_file() {
                if let Some(raw) = pairing.observe(&path) {
                    batch.push(raw);
                    found += 1;
                }
            }

            if batch.len() >= BATCH_SIZE && !sink.send_batch(std::mem::take(&mut batch)) {
                return Ok(ScanStrategy::DirectoryWalk);
            }

            if scanned.is_multiple_of(PROGRESS_EVERY) {
                sink.progress(ScanProgress {
                    scanned,
                    found,
                    current_path: path_text(&path),
                });
            }
        }

        let leftovers = pairing.into_unpaired();
        found += leftovers.len() as u64;
        batch.extend(leftovers);
        sink.send_batch(batch);
        sink.progress(ScanProgress {
            scanned,
            found,
            current_path: String::new(),
        });

        info!(
            "Walk complete: {scanned} objects, {found} links, {error_count} errors in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(ScanStrategy::DirectoryWalk)
    }
}

/// Drive roots become `C:\`; anything else is walked as given.
fn walk_root(volume: &str) -> PathBuf {
    match paths::normalize_drive(volume) {
        Some(root) => PathBuf::from(root),
        None => PathBuf::from(volume.trim()),
    }
}

fn path_text(path: &Path) -> String {
    paths::display_form(&path.to_string_lossy())
}

/// Pairs names of multiply-linked files so each file record is reported
/// once, with one of its other names as the target.
#[derive(Default)]
pub(crate) struct HardlinkPairing {
    /// First name seen per `(volume, index)`; `None` once paired.
    first_seen: HashMap<(u64, u64), Option<String>>,
}

impl HardlinkPairing {
    /// Record a regular file. Returns an entry the second time a file
    /// record's name is seen.
    pub(crate) fn observe(&mut self, path: &Path) -> Option<RawEntry> {
        let identity = file_identity(path).ok()?;
        if identity.links < 2 {
            return None;
        }
        let name = path_text(path);
        match self.first_seen.get_mut(&(identity.volume, identity.index)) {
            None => {
                self.first_seen
                    .insert((identity.volume, identity.index), Some(name));
                None
            }
            Some(slot) => slot
                .take()
                .map(|first| RawEntry::new(first, name, LinkType::Hardlink)),
        }
    }

    /// Files whose other names were never seen (outside the walked tree or
    /// excluded). They are reported with themselves as the target.
    pub(crate) fn into_unpaired(self) -> Vec<RawEntry> {
        let mut unpaired: Vec<RawEntry> = self
            .first_seen
            .into_values()
            .flatten()
            .map(|name| RawEntry::new(name.clone(), name, LinkType::Hardlink))
            .collect();
        unpaired.sort_by(|a, b| a.path.cmp(&b.path));
        unpaired
    }
}
