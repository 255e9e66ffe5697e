/// NTFS volume enumeration using the Windows API.
///
/// Lists local NTFS volumes with their label and capacity. Links can only be
/// scanned on NTFS, so other filesystems are filtered out here.
use serde::{Deserialize, Serialize};

/// Information about a single NTFS volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Drive letter, e.g. "C:".
    pub letter: String,
    /// Volume label (e.g. "Windows", "Data").
    pub label: String,
    /// Filesystem name; always "NTFS" for listed volumes.
    pub filesystem: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Enumerate all local NTFS volumes, sorted by letter.
///
/// Network drives are excluded. Returns an empty vec if the Windows API call
/// fails.
#[cfg(windows)]
pub fn enumerate_volumes() -> Vec<VolumeInfo> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use windows::Win32::Storage::FileSystem::{
        GetDiskFreeSpaceExW, GetDriveTypeW, GetLogicalDriveStringsW, GetVolumeInformationW,
    };

    const DRIVE_REMOTE_VAL: u32 = 4;

    let mut volumes = Vec::new();

    // GetLogicalDriveStringsW returns null-separated drive root strings.
    let mut buffer = [0u16; 256];
    let len = unsafe { GetLogicalDriveStringsW(Some(&mut buffer)) };

    if len == 0 {
        tracing::warn!("GetLogicalDriveStringsW returned 0");
        return volumes;
    }

    let full = OsString::from_wide(&buffer[..len as usize]);
    let full_str = full.to_string_lossy();

    for root in full_str.split('\0').filter(|s| !s.is_empty()) {
        let root_wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
        let root_pcwstr = windows::core::PCWSTR(root_wide.as_ptr());

        if unsafe { GetDriveTypeW(root_pcwstr) } == DRIVE_REMOTE_VAL {
            continue;
        }

        let mut label_buf = [0u16; 256];
        let mut fs_buf = [0u16; 256];
        let has_volume_info = unsafe {
            GetVolumeInformationW(
                root_pcwstr,
                Some(&mut label_buf),
                None,
                None,
                None,
                Some(&mut fs_buf),
            )
            .is_ok()
        };
        if !has_volume_info {
            continue;
        }

        let filesystem = wide_to_string(&fs_buf);
        if filesystem != "NTFS" {
            continue;
        }

        let mut free_caller: u64 = 0;
        let mut total: u64 = 0;
        let mut free_total: u64 = 0;
        let has_space = unsafe {
            GetDiskFreeSpaceExW(
                root_pcwstr,
                Some(&mut free_caller as *mut u64),
                Some(&mut total as *mut u64),
                Some(&mut free_total as *mut u64),
            )
            .is_ok()
        };
        let (total_bytes, free_bytes) = if has_space {
            (total, free_caller)
        } else {
            (0, 0)
        };

        volumes.push(VolumeInfo {
            letter: root.trim_end_matches('\\').to_string(),
            label: wide_to_string(&label_buf),
            filesystem,
            total_bytes,
            free_bytes,
        });
    }

    volumes.sort_by(|a, b| a.letter.cmp(&b.letter));
    volumes
}

#[cfg(windows)]
fn wide_to_string(buf: &[u16]) -> String {
    String::from_utf16_lossy(&buf[..buf.iter().position(|&c| c == 0).unwrap_or(buf.len())])
}

/// No NTFS volumes exist outside Windows.
#[cfg(not(windows))]
pub fn enumerate_volumes() -> Vec<VolumeInfo> {
    Vec::new()
}
