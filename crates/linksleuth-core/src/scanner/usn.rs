/// USN/MFT enumerator - the Tier 1 (fastest) link enumerator.
///
/// Reads every file record of an NTFS volume through `FSCTL_ENUM_USN_DATA`
/// instead of traversing directories, rebuilds full paths from parent file
/// reference numbers, and inspects only the records that can be links:
/// reparse points (symlinks, junctions) and regular files with more than
/// one name (hardlinks). Name counts come from each file's MFT record,
/// read through the volume handle, so single-named files are never opened.
///
/// # Requirements
///
/// - The volume must be NTFS and given as a drive (`C`, `C:`, `C:\`).
/// - The process must be running with **administrator** privileges (required
///   to open `\\.\C:` with `GENERIC_READ`).
use super::enumerator::{LinkEnumerator, ScanSink};
use super::progress::{ScanProgress, ScanStrategy};
use super::walk::BATCH_SIZE;
use crate::error::ScanError;
use crate::model::{paths, LinkType, RawEntry};
use crate::platform::links::hardlink_names;
use crate::platform::{file_identity, is_elevated, symlink_kind};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_REPARSE_POINT, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::{FSCTL_ENUM_USN_DATA, FSCTL_GET_NTFS_FILE_RECORD};
use windows::Win32::System::IO::DeviceIoControl;

/// Maximum number of MFT records held in memory. Enumeration stops with an
/// error beyond this rather than exhausting the heap.
pub const MAX_MFT_RECORDS: usize = 15_000_000;

/// The NTFS root directory has MFT reference number 5.
const NTFS_ROOT_MFT_REF: u64 = 5;

/// MFT references 0–23 are reserved for NTFS metafiles.
const LAST_RESERVED_MFT_REF: u64 = 23;

/// Candidates inspected per parallel step; cancellation is checked between
/// steps.
const INSPECT_CHUNK: usize = 4_096;

/// Guards path reconstruction against corrupt parent chains.
const MAX_PATH_DEPTH: usize = 512;

const GENERIC_READ: u32 = 0x8000_0000;

/// Lower 48 bits of a file reference are the MFT record number.
const REF_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// `NTFS_FILE_RECORD_OUTPUT_BUFFER` header plus the largest file record.
const FILE_RECORD_BUF: usize = 12 + 4096;

/// Update sequence stride inside a file record.
const FIXUP_STRIDE: usize = 512;

const ATTR_ATTRIBUTE_LIST: u32 = 0x20;
const ATTR_FILE_NAME: u32 = 0x30;
const ATTR_END: u32 = 0xFFFF_FFFF;

/// `$FILE_NAME` namespace of an 8.3 alias; it is not a separate link.
const NAMESPACE_DOS: u8 = 2;

/// USN-based enumerator.
#[derive(Debug, Clone, Default)]
pub struct UsnEnumerator {
    excluded: Vec<String>,
}

impl UsnEnumerator {
    pub fn new(excluded: Vec<String>) -> Self {
        Self { excluded }
    }
}

/// One MFT record as reported by `FSCTL_ENUM_USN_DATA`.
struct MftRecord {
    parent_ref: u64,
    name: String,
    attributes: u32,
}

impl MftRecord {
    fn is_dir(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_DIRECTORY.0 != 0
    }

    fn is_reparse_point(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_REPARSE_POINT.0 != 0
    }
}

/// Raw volume handle, closed on drop.
struct VolumeHandle(HANDLE);

impl Drop for VolumeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

impl LinkEnumerator for UsnEnumerator {
    fn enumerate(&self, volume: &str, sink: &ScanSink) -> Result<ScanStrategy, ScanError> {
        let root = paths::normalize_drive(volume)
            .ok_or_else(|| ScanError::InvalidVolume(volume.to_string()))?;
        if !is_elevated() {
            return Err(ScanError::Enumeration(
                "USN enumeration requires administrator privileges".to_string(),
            ));
        }

        let start = Instant::now();
        let drive = root.trim_end_matches('\\').to_string();
        let handle = open_volume(&drive)?;

        let Some(records) = read_records(&handle, sink)? else {
            return Ok(ScanStrategy::UsnJournal);
        };

        tracing::info!(
            "USN enumeration of {drive}: {} records in {:?}",
            records.len(),
            start.elapsed()
        );

        let mut cache: HashMap<u64, String> = HashMap::new();
        let mut candidates: Vec<(String, bool)> = Vec::new();
        let mut file_record = vec![0u8; FILE_RECORD_BUF];
        for (&file_ref, record) in &records {
            if file_ref <= LAST_RESERVED_MFT_REF || record.name.starts_with('$') {
                continue;
            }
            if !record.is_reparse_point() {
                if record.is_dir() {
                    continue;
                }
                // Unknown counts fall through to the per-file check.
                if matches!(name_count(&handle, file_ref, &mut file_record), Some(n) if n < 2) {
                    continue;
                }
            }
            let Some(path) = resolve_path(file_ref, &drive, &records, &mut cache) else {
                continue;
            };
            if paths::is_excluded(&path, &self.excluded) {
                continue;
            }
            candidates.push((path, record.is_reparse_point()));
        }
        drop(cache);
        drop(handle);

        let scanned = records.len() as u64;
        let mut found: u64 = 0;
        for chunk in candidates.chunks(INSPECT_CHUNK) {
            if sink.is_cancelled() {
                return Ok(ScanStrategy::UsnJournal);
            }
            let links: Vec<RawEntry> = chunk
                .par_iter()
                .filter_map(|(path, is_reparse)| inspect(path, *is_reparse, &drive))
                .collect();
            found += links.len() as u64;
            for batch in links.chunks(BATCH_SIZE) {
                if !sink.send_batch(batch.to_vec()) {
                    return Ok(ScanStrategy::UsnJournal);
                }
            }
            if let Some((last, _)) = chunk.last() {
                sink.progress(ScanProgress {
                    scanned,
                    found,
                    current_path: last.clone(),
                });
            }
        }

        tracing::info!(
            "USN scan of {drive} complete: {found} links in {:?}",
            start.elapsed()
        );
        Ok(ScanStrategy::UsnJournal)
    }
}

fn open_volume(drive: &str) -> Result<VolumeHandle, ScanError> {
    let vol_path = format!("\\\\.\\{drive}");
    let vol_wide: Vec<u16> = vol_path.encode_utf16().chain(std::iter::once(0)).collect();
    let handle = unsafe {
        CreateFileW(
            PCWSTR(vol_wide.as_ptr()),
            GENERIC_READ,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            Default::default(),
            None,
        )
    }
    .map_err(|e| ScanError::Enumeration(format!("Failed to open volume {vol_path}: {e}")))?;
    Ok(VolumeHandle(handle))
}

/// Enumerate every MFT record. Returns `None` if the sink was cancelled.
fn read_records(
    handle: &VolumeHandle,
    sink: &ScanSink,
) -> Result<Option<HashMap<u64, MftRecord>>, ScanError> {
    // MFT_ENUM_DATA_V0: { StartFileReferenceNumber: u64, LowUsn: i64, HighUsn: i64 }
    #[repr(C)]
    #[derive(Copy, Clone)]
    struct MftEnumDataV0 {
        start_file_reference_number: u64,
        low_usn: i64,
        high_usn: i64,
    }

    let mut enum_data = MftEnumDataV0 {
        start_file_reference_number: 0,
        low_usn: 0,
        high_usn: i64::MAX,
    };

    let mut records: HashMap<u64, MftRecord> = HashMap::with_capacity(1_000_000);
    let mut output_buf = vec![0u8; 256 * 1024];

    loop {
        if sink.is_cancelled() {
            return Ok(None);
        }

        let mut bytes_returned: u32 = 0;
        let ok = unsafe {
            DeviceIoControl(
                handle.0,
                FSCTL_ENUM_USN_DATA,
                Some(&enum_data as *const MftEnumDataV0 as *const std::ffi::c_void),
                std::mem::size_of::<MftEnumDataV0>() as u32,
                Some(output_buf.as_mut_ptr() as *mut std::ffi::c_void),
                output_buf.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if ok.is_err() || bytes_returned <= 8 {
            // ERROR_HANDLE_EOF marks the end of the MFT.
            break;
        }

        let returned = &output_buf[..bytes_returned as usize];
        let next_start = read_u64(returned, 0);
        parse_usn_records(&returned[8..], &mut records);

        if records.len() >= MAX_MFT_RECORDS {
            return Err(ScanError::Enumeration(format!(
                "volume contains more than {MAX_MFT_RECORDS} MFT records"
            )));
        }

        sink.progress(ScanProgress {
            scanned: records.len() as u64,
            found: 0,
            current_path: format!("Reading MFT... {} records", records.len()),
        });

        if next_start == 0 || next_start == enum_data.start_file_reference_number {
            break;
        }
        enum_data.start_file_reference_number = next_start;
    }

    Ok(Some(records))
}

/// Number of names the MFT record of `file_ref` carries, ignoring 8.3
/// aliases. `None` when the record cannot be read or keeps its names in
/// extension records.
fn name_count(handle: &VolumeHandle, file_ref: u64, buffer: &mut [u8]) -> Option<usize> {
    let input = file_ref.to_le_bytes();
    let mut bytes_returned: u32 = 0;
    unsafe {
        DeviceIoControl(
            handle.0,
            FSCTL_GET_NTFS_FILE_RECORD,
            Some(input.as_ptr() as *const std::ffi::c_void),
            input.len() as u32,
            Some(buffer.as_mut_ptr() as *mut std::ffi::c_void),
            buffer.len() as u32,
            Some(&mut bytes_returned),
            None,
        )
    }
    .ok()?;

    let returned = buffer.get_mut(..bytes_returned as usize)?;
    // The call answers with the nearest in-use record at or below the
    // requested one.
    if returned.len() < 12 || read_u64(returned, 0) & REF_MASK != file_ref {
        return None;
    }
    let record_len = read_u32(returned, 8) as usize;
    count_file_names(returned.get_mut(12..12 + record_len)?)
}

/// Count the non-DOS `$FILE_NAME` attributes of a raw `FILE` record.
///
/// Layout:
///   0: "FILE"                   4: update sequence offset (u16)
///   6: update sequence count    0x14: first attribute offset (u16)
/// Attribute: 0: type (u32)  4: length (u32)  0x14: resident value offset (u16)
/// `$FILE_NAME` value: 0x41: namespace (u8)
fn count_file_names(record: &mut [u8]) -> Option<usize> {
    if record.len() < 0x30 || &record[0..4] != b"FILE" {
        return None;
    }
    apply_fixups(record)?;

    let mut offset = read_u16(record, 0x14) as usize;
    let mut names = 0;
    while offset + 8 <= record.len() {
        let kind = read_u32(record, offset);
        if kind == ATTR_END {
            return Some(names);
        }
        let len = read_u32(record, offset + 4) as usize;
        if len < 0x18 || offset + len > record.len() {
            return None;
        }
        match kind {
            ATTR_ATTRIBUTE_LIST => return None,
            ATTR_FILE_NAME => {
                let value = offset + read_u16(record, offset + 0x14) as usize;
                if *record.get(value + 0x41)? != NAMESPACE_DOS {
                    names += 1;
                }
            }
            _ => {}
        }
        offset += len;
    }
    None
}

/// Restore the last two bytes of every 512-byte stride from the update
/// sequence array. Idempotent when the fixups are already applied.
fn apply_fixups(record: &mut [u8]) -> Option<()> {
    let array = read_u16(record, 4) as usize;
    let count = read_u16(record, 6) as usize;
    if count == 0 || array + count * 2 > record.len() {
        return None;
    }
    for stride in 1..count {
        let end = stride * FIXUP_STRIDE;
        if end > record.len() {
            break;
        }
        let saved = array + stride * 2;
        record.copy_within(saved..saved + 2, end - 2);
    }
    Some(())
}

/// Parse a run of `USN_RECORD_V2` entries.
///
/// Layout:
///   0: RecordLength (u32)       8: FileReferenceNumber (u64)
///  16: ParentFileReferenceNumber (u64)
///  52: FileAttributes (u32)    56: FileNameLength (u16)
///  58: FileNameOffset (u16)    60: FileName (UTF-16)
fn parse_usn_records(buffer: &[u8], records: &mut HashMap<u64, MftRecord>) {
    let mut offset = 0usize;
    while offset + 4 <= buffer.len() {
        let record_len = read_u32(buffer, offset) as usize;
        if record_len == 0 || offset + record_len > buffer.len() {
            break;
        }
        if record_len < 60 {
            offset += record_len;
            continue;
        }

        let record = &buffer[offset..offset + record_len];
        // Lower 48 bits are the record number; the rest is a sequence number.
        let file_ref = read_u64(record, 8) & REF_MASK;
        let parent_ref = read_u64(record, 16) & REF_MASK;
        let attributes = read_u32(record, 52);
        let name_len = read_u16(record, 56) as usize;
        let name_offset = read_u16(record, 58) as usize;

        if name_len > 0 && name_offset + name_len <= record_len {
            let name = char::decode_utf16(
                record[name_offset..name_offset + name_len]
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]])),
            )
            .map(|r| r.unwrap_or('\u{FFFD}'))
            .collect();
            records.insert(
                file_ref,
                MftRecord {
                    parent_ref,
                    name,
                    attributes,
                },
            );
        }

        offset += record_len;
    }
}

/// Rebuild the full path of `file_ref`, memoising every ancestor.
fn resolve_path(
    file_ref: u64,
    drive: &str,
    records: &HashMap<u64, MftRecord>,
    cache: &mut HashMap<u64, String>,
) -> Option<String> {
    let mut chain: Vec<(u64, &str)> = Vec::new();
    let mut current = file_ref;
    let base = loop {
        if current == NTFS_ROOT_MFT_REF {
            break drive.to_string();
        }
        if let Some(path) = cache.get(&current) {
            break path.clone();
        }
        let record = records.get(&current)?;
        chain.push((current, &record.name));
        if chain.len() > MAX_PATH_DEPTH {
            return None;
        }
        current = record.parent_ref;
    };

    let mut path = base;
    for (reference, name) in chain.iter().rev() {
        path.push(paths::SEPARATOR);
        path.push_str(name);
        if *reference != file_ref {
            cache.insert(*reference, path.clone());
        }
    }
    Some(path)
}

/// Turn a candidate record into a link entry, if it is one.
fn inspect(path: &str, is_reparse: bool, drive: &str) -> Option<RawEntry> {
    let fs_path = Path::new(path);
    if is_reparse {
        let link_type = symlink_kind(fs_path);
        let target = std::fs::read_link(fs_path)
            .map(|target| paths::display_form(&target.to_string_lossy()))
            .unwrap_or_default();
        return Some(RawEntry::new(path, target, link_type));
    }

    let identity = file_identity(fs_path).ok()?;
    if identity.links < 2 {
        return None;
    }
    // Each file record is enumerated once, so its other names come from
    // the filesystem rather than from the walk.
    let own_key = paths::key(path);
    let target = hardlink_names(fs_path)
        .unwrap_or_default()
        .into_iter()
        .map(|name| format!("{drive}{name}"))
        .find(|name| paths::key(name) != own_key)
        .unwrap_or_else(|| path.to_string());
    Some(RawEntry::new(path, target, LinkType::Hardlink))
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
