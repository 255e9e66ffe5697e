/// Persisted action log.
///
/// Stores are append-only: records are never rewritten once written. Reads
/// return the most recent records first.
use crate::error::HistoryError;
use crate::model::{ActionDraft, ActionRecord};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Largest page a single read returns.
pub const MAX_HISTORY_LIMIT: usize = 1_000;

/// Storage for action records.
pub trait HistoryStore: Send + Sync {
    /// Persist a record and return it with its assigned id and timestamp.
    /// Ids increase with every append.
    fn append(&self, draft: ActionDraft) -> Result<ActionRecord, HistoryError>;

    /// Up to `limit` records (capped at [`MAX_HISTORY_LIMIT`]), newest
    /// first, skipping the `offset` newest.
    fn read(&self, limit: usize, offset: usize) -> Result<Vec<ActionRecord>, HistoryError>;
}

fn page(
    records: impl DoubleEndedIterator<Item = ActionRecord>,
    limit: usize,
    offset: usize,
) -> Vec<ActionRecord> {
    records
        .rev()
        .skip(offset)
        .take(limit.min(MAX_HISTORY_LIMIT))
        .collect()
}

/// In-process store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<ActionRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, draft: ActionDraft) -> Result<ActionRecord, HistoryError> {
        let mut records = self.records.lock();
        let id = records.last().map_or(1, |last| last.id + 1);
        let record = ActionRecord::from_draft(id, draft, Utc::now());
        records.push(record.clone());
        Ok(record)
    }

    fn read(&self, limit: usize, offset: usize) -> Result<Vec<ActionRecord>, HistoryError> {
        let records = self.records.lock();
        Ok(page(records.iter().cloned(), limit, offset))
    }
}

/// Store backed by a JSON-lines file, one record per line.
///
/// Appends are serialised by an internal lock and flushed before returning.
/// Lines that fail to parse (a torn final write, manual edits) are skipped
/// with a warning.
#[derive(Debug)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    next_id: Mutex<u64>,
}

impl JsonlHistoryStore {
    /// Open (or prepare to create) the log at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let last_id = read_all(&path)?.last().map_or(0, |record| record.id);
        debug!("Opened history at {} (last id {last_id})", path.display());
        Ok(Self {
            path,
            next_id: Mutex::new(last_id + 1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, draft: ActionDraft) -> Result<ActionRecord, HistoryError> {
        let mut next_id = self.next_id.lock();
        let record = ActionRecord::from_draft(*next_id, draft, Utc::now());
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        // A torn last line would otherwise swallow this record.
        if !ends_at_line_start(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.flush()?;

        *next_id += 1;
        Ok(record)
    }

    fn read(&self, limit: usize, offset: usize) -> Result<Vec<ActionRecord>, HistoryError> {
        // Holding the append lock keeps half-written lines out of the read.
        let _guard = self.next_id.lock();
        Ok(page(read_all(&self.path)?.into_iter(), limit, offset))
    }
}

/// True when the file is empty or its last byte is a newline.
fn ends_at_line_start(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_all(path: &Path) -> Result<Vec<ActionRecord>, HistoryError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => warn!("Skipping unreadable history line {}: {err}", index + 1),
        }
    }
    Ok(records)
}
