/// Mutation engine - create, delete and retarget links.
///
/// Every request goes through the same pipeline:
/// 1. normalise paths (`/` to `\`, trimmed);
/// 2. structural validation, rejected before the OS is touched;
/// 3. the OS call, delegated to a [`LinkOperator`];
/// 4. one history record for the outcome, success or failure;
/// 5. exactly one rescan, the only way the snapshot is refreshed.
pub mod operator;

pub use operator::{CreateRequest, FsLinkOperator, LinkInfo, LinkOperator};

use crate::error::{MutationError, ValidationError};
use crate::history::HistoryStore;
use crate::model::{paths, ActionDraft, ActionRecord, ActionType, LinkType};
use crate::scanner::ScanCoordinator;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Whether the history append that follows a mutation succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditStatus {
    Recorded(ActionRecord),
    /// The mutation happened but its record could not be written. The
    /// filesystem and the audit trail have diverged.
    Missing(String),
}

/// Outcome of a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReport {
    pub action: ActionType,
    pub path: String,
    pub audit: AuditStatus,
}

impl MutationReport {
    pub fn record(&self) -> Option<&ActionRecord> {
        match &self.audit {
            AuditStatus::Recorded(record) => Some(record),
            AuditStatus::Missing(_) => None,
        }
    }
}

/// A mutation with all paths already known. Undo builds these directly from
/// history records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkMutation {
    Create(CreateRequest),
    Delete {
        path: String,
        known: Option<LinkInfo>,
    },
    Retarget {
        path: String,
        new_target: String,
        known: Option<LinkInfo>,
    },
}

pub struct MutationEngine {
    operator: Arc<dyn LinkOperator>,
    history: Arc<dyn HistoryStore>,
    scanner: Arc<ScanCoordinator>,
}

impl MutationEngine {
    pub fn new(
        operator: Arc<dyn LinkOperator>,
        history: Arc<dyn HistoryStore>,
        scanner: Arc<ScanCoordinator>,
    ) -> Self {
        Self {
            operator,
            history,
            scanner,
        }
    }

    pub fn scanner(&self) -> &Arc<ScanCoordinator> {
        &self.scanner
    }

    pub fn create(
        &self,
        link_path: &str,
        target: &str,
        link_type: LinkType,
        target_is_dir: bool,
    ) -> Result<MutationReport, MutationError> {
        self.apply(
            LinkMutation::Create(CreateRequest {
                link_path: link_path.to_string(),
                target: target.to_string(),
                link_type,
                target_is_dir,
            }),
            None,
        )
    }

    pub fn delete(&self, path: &str) -> Result<MutationReport, MutationError> {
        self.apply(
            LinkMutation::Delete {
                path: path.to_string(),
                known: None,
            },
            None,
        )
    }

    pub fn retarget(&self, path: &str, new_target: &str) -> Result<MutationReport, MutationError> {
        self.apply(
            LinkMutation::Retarget {
                path: path.to_string(),
                new_target: new_target.to_string(),
                known: None,
            },
            None,
        )
    }

    /// Run one mutation. With `undoes` set, the outcome is recorded as an
    /// `Undo` of that record instead of under its own action type.
    pub(crate) fn apply(
        &self,
        mutation: LinkMutation,
        undoes: Option<u64>,
    ) -> Result<MutationReport, MutationError> {
        let planned = self.plan(mutation)?;
        let path = planned.draft.link_path.clone();

        let outcome = match &planned.call {
            OsCall::Create(request) => self.operator.create(request),
            OsCall::Delete(link_type) => self.operator.delete(&path, *link_type),
            OsCall::Retarget { current, new_target } => {
                self.operator.retarget(&path, current, new_target)
            }
        };

        let mut draft = planned.draft;
        if let Some(reversed) = undoes {
            draft.action_type = ActionType::Undo;
            draft.undoes = Some(reversed);
        }
        draft.success = outcome.is_ok();
        draft.error_msg = outcome.as_ref().err().map(|err| err.message.clone());
        let recorded_as = draft.action_type;

        let audit = match self.history.append(draft) {
            Ok(record) => AuditStatus::Recorded(record),
            Err(err) => {
                error!(
                    "{} of {path} was applied (success: {}) but its history record could not be written: {err}",
                    recorded_as.label(),
                    outcome.is_ok()
                );
                AuditStatus::Missing(err.to_string())
            }
        };

        self.refresh(&path);

        match outcome {
            Ok(()) => {
                info!("{} {path}: done", recorded_as.label());
                Ok(MutationReport {
                    action: recorded_as,
                    path,
                    audit,
                })
            }
            Err(err) => {
                warn!("{} {path} failed: {}", recorded_as.label(), err.message);
                let record = match audit {
                    AuditStatus::Recorded(record) => Some(record),
                    AuditStatus::Missing(_) => None,
                };
                Err(MutationError::Os {
                    message: err.message,
                    record,
                })
            }
        }
    }

    /// Normalise, validate and work out both the OS call and the record it
    /// will produce.
    fn plan(&self, mutation: LinkMutation) -> Result<Planned, ValidationError> {
        match mutation {
            LinkMutation::Create(request) => {
                let link_path = checked_path(&request.link_path)?;
                let target = checked_target(&request.target)?;
                if self.scanner.contains_path(&link_path) {
                    return Err(ValidationError::AlreadyExists(link_path));
                }
                check_target_shape(&link_path, &target, request.link_type)?;

                let request = CreateRequest {
                    link_path: link_path.clone(),
                    target: target.clone(),
                    ..request
                };
                Ok(Planned {
                    draft: draft(
                        ActionType::Create,
                        link_path,
                        request.link_type,
                        None,
                        Some(target),
                        request.target_is_dir,
                    ),
                    call: OsCall::Create(request),
                })
            }
            LinkMutation::Delete { path, known } => {
                let path = checked_path(&path)?;
                let current = match known {
                    Some(info) => info,
                    None => self.current_link(&path)?,
                };
                Ok(Planned {
                    draft: draft(
                        ActionType::Delete,
                        path,
                        current.link_type,
                        Some(current.target),
                        None,
                        current.target_is_dir,
                    ),
                    call: OsCall::Delete(current.link_type),
                })
            }
            LinkMutation::Retarget {
                path,
                new_target,
                known,
            } => {
                let path = checked_path(&path)?;
                let new_target = checked_target(&new_target)?;
                let current = match known {
                    Some(info) => info,
                    None => self.current_link(&path)?,
                };
                check_target_shape(&path, &new_target, current.link_type)?;
                Ok(Planned {
                    draft: draft(
                        ActionType::Retarget,
                        path,
                        current.link_type,
                        Some(current.target.clone()),
                        Some(new_target.clone()),
                        current.target_is_dir,
                    ),
                    call: OsCall::Retarget {
                        current,
                        new_target,
                    },
                })
            }
        }
    }

    /// The link currently at `path`: read from the filesystem, falling back
    /// to the snapshot when the operator cannot inspect it.
    fn current_link(&self, path: &str) -> Result<LinkInfo, ValidationError> {
        match self.operator.inspect(path) {
            Ok(info) => Ok(info),
            Err(err) => match self.scanner.find(path) {
                Some(entry) => Ok(LinkInfo {
                    target_is_dir: entry.link_type == LinkType::Junction,
                    link_type: entry.link_type,
                    target: entry.target,
                }),
                None => Err(ValidationError::NotALink {
                    path: path.to_string(),
                    reason: err.message,
                }),
            },
        }
    }

    fn refresh(&self, path: &str) {
        let started = match self.scanner.rescan() {
            Ok(Some(session)) => Ok(session),
            Ok(None) => match paths::volume_of(path) {
                Some(volume) => self.scanner.start_scan(&volume),
                None => return,
            },
            Err(err) => Err(err),
        };
        if let Err(err) = started {
            warn!("Rescan after mutation of {path} could not start: {err}");
        }
    }
}

enum OsCall {
    Create(CreateRequest),
    Delete(LinkType),
    Retarget { current: LinkInfo, new_target: String },
}

struct Planned {
    draft: ActionDraft,
    call: OsCall,
}

fn draft(
    action_type: ActionType,
    link_path: String,
    link_type: LinkType,
    target_old: Option<String>,
    target_new: Option<String>,
    target_is_dir: bool,
) -> ActionDraft {
    ActionDraft {
        action_type,
        link_path,
        link_type,
        target_old,
        target_new,
        target_is_dir,
        undoes: None,
        success: false,
        error_msg: None,
    }
}

fn checked_path(path: &str) -> Result<String, ValidationError> {
    let path = paths::normalize(path);
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if !paths::is_absolute(&path) {
        return Err(ValidationError::NotAbsolute(path));
    }
    Ok(path)
}

fn checked_target(target: &str) -> Result<String, ValidationError> {
    let target = paths::normalize(target);
    if target.is_empty() {
        return Err(ValidationError::EmptyTarget);
    }
    Ok(target)
}

/// Junction targets must be absolute; hardlinks cannot cross volumes.
fn check_target_shape(
    link_path: &str,
    target: &str,
    link_type: LinkType,
) -> Result<(), ValidationError> {
    match link_type {
        LinkType::Symlink => Ok(()),
        LinkType::Junction => {
            if paths::is_absolute(target) {
                Ok(())
            } else {
                Err(ValidationError::JunctionTargetNotAbsolute(target.to_string()))
            }
        }
        LinkType::Hardlink => {
            let link_volume = paths::volume_of(link_path);
            // A relative target lives next to the link.
            let target_volume = paths::volume_of(target).or_else(|| link_volume.clone());
            match (link_volume, target_volume) {
                (Some(link_volume), Some(target_volume)) if link_volume != target_volume => {
                    Err(ValidationError::CrossVolumeHardlink {
                        link_volume,
                        target_volume,
                    })
                }
                _ => Ok(()),
            }
        }
    }
}
