//! Error taxonomy for the core.
//!
//! Structural problems are rejected before the OS is touched and are never
//! retried. OS failures are surfaced verbatim and recorded in the history.
//! Cancelled scans and stale results are not errors at all.
use crate::model::ActionRecord;
use thiserror::Error;

/// A mutation request that is malformed before it ever reaches the OS.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Path is empty")]
    EmptyPath,
    #[error("Path must be absolute (drive letter or UNC form): {0}")]
    NotAbsolute(String),
    #[error("Target path is empty")]
    EmptyTarget,
    #[error("Link path already exists: {0}")]
    AlreadyExists(String),
    #[error("{path} is not a known link: {reason}")]
    NotALink { path: String, reason: String },
    #[error("Junction target must be an absolute path: {0}")]
    JunctionTargetNotAbsolute(String),
    #[error("Hardlink requires link and target on the same volume (link on {link_volume}, target on {target_volume})")]
    CrossVolumeHardlink {
        link_volume: String,
        target_volume: String,
    },
}

/// Failure reported by a [`LinkOperator`](crate::mutation::LinkOperator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct OperatorError {
    pub message: String,
}

impl OperatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Windows error raised when the process may not create symbolic links.
const ERROR_PRIVILEGE_NOT_HELD: i32 = 1314;

impl From<std::io::Error> for OperatorError {
    fn from(error: std::io::Error) -> Self {
        if error.raw_os_error() == Some(ERROR_PRIVILEGE_NOT_HELD) {
            return Self::new(
                "SeCreateSymbolicLinkPrivilege is required. Enable Developer Mode in Windows \
                 Settings or run as Administrator.",
            );
        }
        Self::new(error.to_string())
    }
}

/// Outcome of a failed create/delete/retarget.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// The OS call failed. `record` is the failure entry written to the
    /// history, when the append itself succeeded.
    #[error("{message}")]
    Os {
        message: String,
        record: Option<ActionRecord>,
    },
}

/// Failure of the persisted action log.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history record could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to start or run an enumeration.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid volume: {0}. Expected a drive such as C:")]
    InvalidVolume(String),
    #[error("Enumeration failed: {0}")]
    Enumeration(String),
    #[error("Failed to spawn scan thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failure of `undo_last`.
#[derive(Debug, Error)]
pub enum UndoError {
    /// The inverse mutation failed. The `Undo` failure record stays in the
    /// history.
    #[error("Undo failed: {0}")]
    Failed(#[source] MutationError),
    #[error("Undo record for action {action_id} is missing its previous target")]
    Irreversible { action_id: u64 },
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Failure to read the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_error_is_mapped_to_guidance() {
        let err = OperatorError::from(std::io::Error::from_raw_os_error(ERROR_PRIVILEGE_NOT_HELD));
        assert!(err.message.contains("SeCreateSymbolicLinkPrivilege"));
    }

    #[test]
    fn other_io_errors_keep_their_message() {
        let err = OperatorError::from(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        ));
        assert_eq!(err.message, "disk on fire");
    }

    #[test]
    fn cross_volume_message_names_both_volumes() {
        let err = ValidationError::CrossVolumeHardlink {
            link_volume: "C:".into(),
            target_volume: "D:".into(),
        };
        let text = err.to_string();
        assert!(text.contains("C:") && text.contains("D:"));
    }
}
