//! Link validation - resolve each entry's final target and classify health.
//!
//! Validation is a pure function per entry. [`validate_batch`] fans a batch
//! out over rayon; one entry failing (or its resolver panicking) never
//! affects the classification of the others.
pub mod details;

use crate::model::paths;
use crate::model::{LinkEntry, LinkStatus, LinkType, RawEntry};
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Why a target could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NotFound,
    AccessDenied,
    Other(String),
}

/// Filesystem query capability used by the validator.
pub trait TargetResolver: Send + Sync {
    /// Resolve the final location of `target` for the link at `path`.
    ///
    /// Symlinks and junctions are followed through every reparse level.
    /// For hardlinks the link path itself is checked: there is no separate
    /// target object to go stale.
    fn resolve(&self, path: &str, target: &str, link_type: LinkType)
        -> Result<String, ResolveError>;
}

/// Resolver backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResolver;

impl TargetResolver for FsResolver {
    fn resolve(
        &self,
        path: &str,
        target: &str,
        link_type: LinkType,
    ) -> Result<String, ResolveError> {
        match link_type {
            LinkType::Hardlink => std::fs::metadata(path)
                .map(|_| path.to_string())
                .map_err(classify_io_error),
            LinkType::Symlink | LinkType::Junction => {
                let absolute = absolute_target(path, target);
                std::fs::canonicalize(&absolute)
                    .map(|real| paths::display_form(&real.to_string_lossy()))
                    .map_err(classify_io_error)
            }
        }
    }
}

/// Join a relative stored target onto the link's parent directory.
pub(crate) fn absolute_target(link_path: &str, target: &str) -> PathBuf {
    let target_path = PathBuf::from(target);
    if target_path.is_absolute() {
        target_path
    } else {
        Path::new(link_path)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(target_path)
    }
}

pub(crate) fn classify_io_error(error: std::io::Error) -> ResolveError {
    match error.kind() {
        std::io::ErrorKind::NotFound => ResolveError::NotFound,
        std::io::ErrorKind::PermissionDenied => ResolveError::AccessDenied,
        _ => ResolveError::Other(error.to_string()),
    }
}

/// Map a resolution outcome to a link status.
///
/// Permission errors map to `AccessDenied` and are checked first: a denied
/// path's health is unknown.
pub fn classify(result: &Result<String, ResolveError>) -> LinkStatus {
    match result {
        Ok(_) => LinkStatus::Ok,
        Err(ResolveError::AccessDenied) => LinkStatus::AccessDenied,
        Err(ResolveError::NotFound) => LinkStatus::Broken("target does not exist".to_string()),
        Err(ResolveError::Other(message)) => LinkStatus::Broken(message.clone()),
    }
}

/// Validate one raw entry.
pub fn validate_entry(raw: RawEntry, resolver: &dyn TargetResolver) -> LinkEntry {
    let status = if raw.target.trim().is_empty() && raw.link_type != LinkType::Hardlink {
        LinkStatus::Broken("target path is empty".to_string())
    } else {
        classify(&resolver.resolve(&raw.path, &raw.target, raw.link_type))
    };

    LinkEntry {
        path: raw.path,
        target: raw.target,
        link_type: raw.link_type,
        status,
    }
}

/// Validate a batch in parallel. Output order matches input order.
pub fn validate_batch(entries: Vec<RawEntry>, resolver: &dyn TargetResolver) -> Vec<LinkEntry> {
    entries
        .into_par_iter()
        .map(|raw| {
            let fallback = raw.clone();
            catch_unwind(AssertUnwindSafe(|| validate_entry(raw, resolver))).unwrap_or_else(|_| {
                tracing::warn!("Validation of {} panicked", fallback.path);
                LinkEntry {
                    status: LinkStatus::Broken("validation worker crashed".to_string()),
                    ..LinkEntry::unvalidated(fallback)
                }
            })
        })
        .collect()
}
