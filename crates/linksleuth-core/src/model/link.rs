//! Link entries as produced by enumeration and refined by validation.
use serde::{Deserialize, Serialize};

/// The three kinds of NTFS link LinkSleuth tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Symlink,
    Junction,
    Hardlink,
}

impl LinkType {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Symlink => "Symlink",
            Self::Junction => "Junction",
            Self::Hardlink => "Hardlink",
        }
    }
}

/// Health of a link after validation.
///
/// `AccessDenied` means the true health is unknown, so it is never folded
/// into `Broken`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Ok,
    /// The target could not be resolved; carries the reason.
    Broken(String),
    AccessDenied,
}

impl LinkStatus {
    /// Human-readable label, without the broken reason.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Broken(_) => "Broken",
            Self::AccessDenied => "Access denied",
        }
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, Self::Broken(_))
    }
}

/// A raw `(path, target, link_type)` tuple straight from an enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub path: String,
    /// Target as stored in the reparse data (symlinks/junctions) or another
    /// name of the same file (hardlinks).
    pub target: String,
    pub link_type: LinkType,
}

impl RawEntry {
    pub fn new(path: impl Into<String>, target: impl Into<String>, link_type: LinkType) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
            link_type,
        }
    }
}

/// One row of a scan snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub path: String,
    pub target: String,
    pub link_type: LinkType,
    pub status: LinkStatus,
}

impl LinkEntry {
    /// Wrap a raw entry with a placeholder `Ok` status, before validation.
    pub fn unvalidated(raw: RawEntry) -> Self {
        Self {
            path: raw.path,
            target: raw.target,
            link_type: raw.link_type,
            status: LinkStatus::Ok,
        }
    }
}

/// Whether a link object is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    File,
    Directory,
}

/// Full per-link metadata, fetched on demand for one selected path.
///
/// Kept out of the bulk snapshot: a large volume has 10^5 links and these
/// fields would multiply its memory footprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDetails {
    pub path: String,
    /// Target exactly as stored in the link.
    pub target_stored: String,
    /// Final target after following every level of indirection.
    pub target_real: String,
    pub link_type: LinkType,
    pub object_type: ObjectType,
    /// RFC 3339, empty when the platform does not report it.
    pub created_at: String,
    pub modified_at: String,
    pub owner: Option<String>,
    pub attributes: Vec<String>,
    pub status: LinkStatus,
}
