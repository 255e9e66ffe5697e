/// OS-level link operations.
///
/// [`LinkOperator`] is the seam between the mutation engine and the
/// filesystem; [`FsLinkOperator`] is the real implementation. Operators do
/// no structural validation of their own beyond what the OS call needs.
use crate::error::OperatorError;
use crate::model::{paths, LinkType};
use crate::platform::{file_identity, symlink_kind};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// A link to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub link_path: String,
    pub target: String,
    pub link_type: LinkType,
    /// Create a directory symlink even if the target does not exist yet.
    pub target_is_dir: bool,
}

/// What an existing link currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub link_type: LinkType,
    pub target: String,
    pub target_is_dir: bool,
}

/// Performs link mutations against a filesystem.
pub trait LinkOperator: Send + Sync {
    fn create(&self, request: &CreateRequest) -> Result<(), OperatorError>;

    fn delete(&self, path: &str, link_type: LinkType) -> Result<(), OperatorError>;

    /// Point the link at `path` to `new_target`. On failure the link should
    /// be left as described by `current`.
    fn retarget(
        &self,
        path: &str,
        current: &LinkInfo,
        new_target: &str,
    ) -> Result<(), OperatorError>;

    /// Read what the link at `path` currently is.
    fn inspect(&self, path: &str) -> Result<LinkInfo, OperatorError>;
}

/// [`LinkOperator`] backed by `std::fs` (plus `mklink /J` for junctions).
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLinkOperator;

impl LinkOperator for FsLinkOperator {
    fn create(&self, request: &CreateRequest) -> Result<(), OperatorError> {
        let link = Path::new(&request.link_path);
        if fs::symlink_metadata(link).is_ok() {
            return Err(OperatorError::new("Link path already exists"));
        }

        let parent = link
            .parent()
            .ok_or_else(|| OperatorError::new("Link path has no parent directory"))?;
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directory {}", parent.display());
            fs::create_dir_all(parent)?;
        }

        match request.link_type {
            LinkType::Symlink => {
                let is_dir = request.target_is_dir
                    || crate::validator::absolute_target(&request.link_path, &request.target)
                        .is_dir();
                create_symlink(&request.target, link, is_dir)
            }
            LinkType::Junction => create_junction(&request.target, &request.link_path),
            LinkType::Hardlink => {
                // A relative target names a file next to the link.
                let target =
                    crate::validator::absolute_target(&request.link_path, &request.target);
                if !target.is_file() {
                    return Err(OperatorError::new("Hardlink target must be an existing file"));
                }
                fs::hard_link(&target, link)?;
                Ok(())
            }
        }
    }

    fn delete(&self, path: &str, link_type: LinkType) -> Result<(), OperatorError> {
        let metadata = fs::symlink_metadata(path)?;
        let is_reparse = metadata.file_type().is_symlink();

        match link_type {
            LinkType::Symlink | LinkType::Junction if !is_reparse => {
                return Err(OperatorError::new(format!(
                    "{path} is not a {}",
                    link_type.label().to_lowercase()
                )));
            }
            LinkType::Hardlink if !metadata.is_file() => {
                return Err(OperatorError::new(format!("{path} is not a file")));
            }
            _ => {}
        }

        // Directory symlinks and junctions are directories to the OS;
        // file symlinks and hardlinks are files.
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(file_err) if is_reparse => fs::remove_dir(path).map_err(|dir_err| {
                debug!("remove_file({path}) failed: {file_err}");
                OperatorError::from(dir_err)
            }),
            Err(file_err) => Err(file_err.into()),
        }
    }

    fn retarget(
        &self,
        path: &str,
        current: &LinkInfo,
        new_target: &str,
    ) -> Result<(), OperatorError> {
        self.delete(path, current.link_type)?;

        let replacement = CreateRequest {
            link_path: path.to_string(),
            target: new_target.to_string(),
            link_type: current.link_type,
            target_is_dir: current.target_is_dir,
        };
        if let Err(err) = self.create(&replacement) {
            let restore = CreateRequest {
                target: current.target.clone(),
                ..replacement
            };
            if let Err(restore_err) = self.create(&restore) {
                warn!("Failed to restore {path} -> {} after failed retarget: {restore_err}", current.target);
            }
            return Err(err);
        }
        Ok(())
    }

    fn inspect(&self, path: &str) -> Result<LinkInfo, OperatorError> {
        let fs_path = Path::new(path);
        let metadata = fs::symlink_metadata(fs_path)?;

        if metadata.file_type().is_symlink() {
            let link_type = symlink_kind(fs_path);
            let target = fs::read_link(fs_path)?;
            let target_is_dir = link_type == LinkType::Junction
                || fs::metadata(fs_path).map(|m| m.is_dir()).unwrap_or(false);
            return Ok(LinkInfo {
                link_type,
                target: paths::display_form(&target.to_string_lossy()),
                target_is_dir,
            });
        }

        if metadata.is_file() && file_identity(fs_path)?.links > 1 {
            return Ok(LinkInfo {
                link_type: LinkType::Hardlink,
                target: other_name(path).unwrap_or_else(|| path.to_string()),
                target_is_dir: false,
            });
        }

        Err(OperatorError::new("Path is not a recognized link type"))
    }
}

#[cfg(windows)]
fn create_symlink(target: &str, link: &Path, is_dir: bool) -> Result<(), OperatorError> {
    if is_dir {
        std::os::windows::fs::symlink_dir(target, link)?;
    } else {
        std::os::windows::fs::symlink_file(target, link)?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, link: &Path, _is_dir: bool) -> Result<(), OperatorError> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &str, _link: &Path, _is_dir: bool) -> Result<(), OperatorError> {
    Err(OperatorError::new("Symlinks are not supported on this platform"))
}

#[cfg(windows)]
fn create_junction(target: &str, link: &str) -> Result<(), OperatorError> {
    let output = std::process::Command::new("cmd")
        .args(["/C", "mklink", "/J", link, target])
        .output()
        .map_err(|e| OperatorError::new(format!("Failed to create junction: {e}")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(OperatorError::new(if stderr.is_empty() {
        "Failed to create junction using mklink".to_string()
    } else {
        stderr
    }))
}

#[cfg(not(windows))]
fn create_junction(_target: &str, _link: &str) -> Result<(), OperatorError> {
    Err(OperatorError::new("Junctions are only supported on NTFS"))
}

/// Another name of the multiply-linked file at `path`.
#[cfg(windows)]
fn other_name(path: &str) -> Option<String> {
    let drive = paths::volume_of(path)?;
    let own_key = paths::key(path);
    crate::platform::links::hardlink_names(Path::new(path))
        .ok()?
        .into_iter()
        .map(|name| format!("{drive}{name}"))
        .find(|name| paths::key(name) != own_key)
}

// Finding the other names of an inode needs a full walk off NTFS.
#[cfg(not(windows))]
fn other_name(_path: &str) -> Option<String> {
    None
}
