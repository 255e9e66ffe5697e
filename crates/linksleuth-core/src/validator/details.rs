/// On-demand metadata for a single link.
use super::{absolute_target, classify, FsResolver, TargetResolver};
use crate::model::{paths, LinkDetails, LinkType, ObjectType};
use crate::platform::{file_identity, symlink_kind};
use chrono::{DateTime, Utc};
use std::fs::{self, Metadata};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Read the full details of the link at `path`.
///
/// Fails with `InvalidInput` when `path` is neither a reparse-point link
/// nor a file with several names.
pub fn link_details(path: &str) -> io::Result<LinkDetails> {
    let fs_path = Path::new(path);
    let metadata = fs::symlink_metadata(fs_path)?;

    let (link_type, target_stored) = if metadata.file_type().is_symlink() {
        let stored = fs::read_link(fs_path)?;
        (
            symlink_kind(fs_path),
            paths::display_form(&stored.to_string_lossy()),
        )
    } else if metadata.is_file() && file_identity(fs_path)?.links > 1 {
        (LinkType::Hardlink, path.to_string())
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} is not a recognized link type"),
        ));
    };

    let resolved = FsResolver.resolve(path, &target_stored, link_type);
    let target_real = match &resolved {
        Ok(real) => real.clone(),
        Err(_) => absolute_target(path, &target_stored)
            .to_string_lossy()
            .to_string(),
    };

    // A symlink's own metadata says nothing about whether it points at a
    // directory; the target's does, when it exists.
    let is_dir = match link_type {
        LinkType::Junction => true,
        LinkType::Hardlink => false,
        LinkType::Symlink => fs::metadata(fs_path).map(|m| m.is_dir()).unwrap_or(false),
    };

    Ok(LinkDetails {
        path: path.to_string(),
        target_stored,
        target_real,
        link_type,
        object_type: if is_dir {
            ObjectType::Directory
        } else {
            ObjectType::File
        },
        created_at: rfc3339(metadata.created()),
        modified_at: rfc3339(metadata.modified()),
        owner: owner(&metadata),
        attributes: attributes(&metadata),
        status: classify(&resolved),
    })
}

fn rfc3339(time: io::Result<SystemTime>) -> String {
    time.ok()
        .map(|time| DateTime::<Utc>::from(time).to_rfc3339())
        .unwrap_or_default()
}

#[cfg(unix)]
fn owner(metadata: &Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    Some(format!("uid {}", metadata.uid()))
}

// Owner lookup needs the security descriptor APIs; not reported for now.
#[cfg(not(unix))]
fn owner(_metadata: &Metadata) -> Option<String> {
    None
}

fn attributes(metadata: &Metadata) -> Vec<String> {
    let mut result = Vec::new();
    if metadata.permissions().readonly() {
        result.push("READONLY".to_string());
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FLAGS: [(u32, &str); 4] = [
            (0x2, "HIDDEN"),
            (0x4, "SYSTEM"),
            (0x20, "ARCHIVE"),
            (0x400, "REPARSE_POINT"),
        ];
        let raw = metadata.file_attributes();
        for (bit, name) in FLAGS {
            if raw & bit != 0 {
                result.push(name.to_string());
            }
        }
    }

    if result.is_empty() {
        result.push("NORMAL".to_string());
    }
    result
}
