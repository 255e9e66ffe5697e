/// Link-level filesystem queries: reparse tags and file identity.
///
/// Both scan strategies use these to tell junctions from symlinks and to
/// recognise a file with several names (a hardlink set) only once.
use crate::model::LinkType;
use std::io;
use std::path::Path;

/// Reparse tag of an NTFS junction (mount point).
pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
/// Reparse tag of an NTFS symbolic link.
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// Identity of the file record behind a path.
///
/// Two paths with the same `(volume, index)` are names of the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub volume: u64,
    pub index: u64,
    /// Number of names (hardlinks) the file record has.
    pub links: u64,
}

/// Classify a path that `symlink_metadata` reported as a symlink.
///
/// On Windows std reports junctions as symlinks too, so the reparse tag
/// decides. Anywhere else every such path is a plain symlink.
pub fn symlink_kind(path: &Path) -> LinkType {
    match reparse_tag(path) {
        Ok(IO_REPARSE_TAG_MOUNT_POINT) => LinkType::Junction,
        Ok(_) => LinkType::Symlink,
        Err(err) => {
            tracing::debug!("Reparse tag unavailable for {}: {err}", path.display());
            LinkType::Symlink
        }
    }
}

/// Identity of the file behind `path` (following reparse points).
#[cfg(unix)]
pub fn file_identity(path: &Path) -> io::Result<FileIdentity> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path)?;
    Ok(FileIdentity {
        volume: meta.dev(),
        index: meta.ino(),
        links: meta.nlink(),
    })
}

#[cfg(windows)]
pub fn file_identity(path: &Path) -> io::Result<FileIdentity> {
    use windows::Win32::Storage::FileSystem::{
        GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION, FILE_FLAG_BACKUP_SEMANTICS,
    };

    let handle = win::open(path, FILE_FLAG_BACKUP_SEMANTICS)?;
    let mut info = BY_HANDLE_FILE_INFORMATION::default();
    let result = unsafe { GetFileInformationByHandle(handle.0, &mut info) };
    result.map_err(io::Error::from)?;

    Ok(FileIdentity {
        volume: info.dwVolumeSerialNumber as u64,
        index: ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64,
        links: info.nNumberOfLinks as u64,
    })
}

#[cfg(not(any(unix, windows)))]
pub fn file_identity(_path: &Path) -> io::Result<FileIdentity> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file identity is not available on this platform",
    ))
}

/// Every name of the file behind `path`, as volume-relative paths
/// (`\dir\file`, no drive letter).
#[cfg(windows)]
pub fn hardlink_names(path: &Path) -> io::Result<Vec<String>> {
    use std::os::windows::ffi::OsStrExt;
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::Storage::FileSystem::{FindClose, FindFirstFileNameW, FindNextFileNameW};

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let mut buffer = vec![0u16; 32 * 1024];
    let mut length = buffer.len() as u32;

    let handle = unsafe {
        FindFirstFileNameW(
            PCWSTR(wide.as_ptr()),
            0,
            &mut length,
            PWSTR(buffer.as_mut_ptr()),
        )
    }
    .map_err(io::Error::from)?;

    let mut names = vec![wide_name(&buffer, length)];
    loop {
        length = buffer.len() as u32;
        let next = unsafe { FindNextFileNameW(handle, &mut length, PWSTR(buffer.as_mut_ptr())) };
        if next.is_err() {
            break;
        }
        names.push(wide_name(&buffer, length));
    }
    unsafe {
        let _ = FindClose(handle);
    }
    Ok(names)
}

#[cfg(windows)]
fn wide_name(buffer: &[u16], length: u32) -> String {
    let used = &buffer[..(length as usize).min(buffer.len())];
    let end = used.iter().position(|&c| c == 0).unwrap_or(used.len());
    String::from_utf16_lossy(&used[..end])
}

/// Read the reparse tag of `path` without following it.
#[cfg(windows)]
pub fn reparse_tag(path: &Path) -> io::Result<u32> {
    use windows::Win32::Storage::FileSystem::{
        FILE_FLAGS_AND_ATTRIBUTES, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT,
    };
    use windows::Win32::System::Ioctl::FSCTL_GET_REPARSE_POINT;
    use windows::Win32::System::IO::DeviceIoControl;

    let handle = win::open(
        path,
        FILE_FLAGS_AND_ATTRIBUTES(FILE_FLAG_BACKUP_SEMANTICS.0 | FILE_FLAG_OPEN_REPARSE_POINT.0),
    )?;

    // MAXIMUM_REPARSE_DATA_BUFFER_SIZE.
    let mut out_buffer = vec![0u8; 16 * 1024];
    let mut bytes_returned = 0u32;
    let result = unsafe {
        DeviceIoControl(
            handle.0,
            FSCTL_GET_REPARSE_POINT,
            None,
            0,
            Some(out_buffer.as_mut_ptr() as *mut std::ffi::c_void),
            out_buffer.len() as u32,
            Some(&mut bytes_returned),
            None,
        )
    };
    result.map_err(io::Error::from)?;

    if bytes_returned < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "reparse buffer too short",
        ));
    }
    Ok(u32::from_le_bytes([
        out_buffer[0],
        out_buffer[1],
        out_buffer[2],
        out_buffer[3],
    ]))
}

#[cfg(not(windows))]
pub fn reparse_tag(_path: &Path) -> io::Result<u32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "reparse tags are an NTFS concept",
    ))
}

#[cfg(windows)]
mod win {
    use std::io;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ,
        FILE_SHARE_WRITE, OPEN_EXISTING,
    };

    /// FILE_READ_ATTRIBUTES is enough for identity and reparse queries.
    const FILE_READ_ATTRIBUTES: u32 = 0x80;

    /// A handle closed on drop.
    pub struct OwnedHandle(pub HANDLE);

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    pub fn open(path: &Path, flags: FILE_FLAGS_AND_ATTRIBUTES) -> io::Result<OwnedHandle> {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                FILE_READ_ATTRIBUTES,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                flags,
                None,
            )
        }
        .map_err(io::Error::from)?;
        Ok(OwnedHandle(handle))
    }
}
