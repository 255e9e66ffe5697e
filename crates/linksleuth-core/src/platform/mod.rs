//! Platform-specific functionality - token privileges, NTFS volume
//! enumeration, reparse-tag and file-identity queries.
//!
//! Every function has a portable fallback so the core builds and tests on
//! non-Windows hosts.
pub mod links;
pub mod permissions;
pub mod volumes;

pub use links::{file_identity, symlink_kind, FileIdentity};
pub use permissions::{is_elevated, link_privileges, LinkPrivileges};
pub use volumes::{enumerate_volumes, VolumeInfo};
