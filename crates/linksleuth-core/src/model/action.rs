//! Action records - the append-only audit trail of every mutation.
use super::LinkType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of mutation an [`ActionRecord`] captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    Create,
    Delete,
    Retarget,
    Undo,
}

impl ActionType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Delete => "Delete",
            Self::Retarget => "Retarget",
            Self::Undo => "Undo",
        }
    }
}

/// A record as it is handed to the store, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDraft {
    pub action_type: ActionType,
    pub link_path: String,
    pub link_type: LinkType,
    /// Target before the mutation. `None` for `Create`.
    pub target_old: Option<String>,
    /// Target after the mutation. `None` for `Delete`.
    pub target_new: Option<String>,
    /// Whether the link pointed at a directory. Needed to recreate a deleted
    /// symlink with the right flavour.
    pub target_is_dir: bool,
    /// For `Undo` records, the id of the record that was reversed.
    pub undoes: Option<u64>,
    pub success: bool,
    pub error_msg: Option<String>,
}

/// A persisted action. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: u64,
    pub action_type: ActionType,
    pub link_path: String,
    pub link_type: LinkType,
    pub target_old: Option<String>,
    pub target_new: Option<String>,
    #[serde(default)]
    pub target_is_dir: bool,
    #[serde(default)]
    pub undoes: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_msg: Option<String>,
}

impl ActionRecord {
    /// Materialise a draft with the id the store assigned.
    pub fn from_draft(id: u64, draft: ActionDraft, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            action_type: draft.action_type,
            link_path: draft.link_path,
            link_type: draft.link_type,
            target_old: draft.target_old,
            target_new: draft.target_new,
            target_is_dir: draft.target_is_dir,
            undoes: draft.undoes,
            timestamp,
            success: draft.success,
            error_msg: draft.error_msg,
        }
    }
}
