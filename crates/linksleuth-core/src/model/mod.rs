//! Data model shared by the scanner, validator, mutation engine and history.
//!
//! Re-exports the link types, action records and path helpers.
pub mod action;
pub mod link;
pub mod paths;

pub use action::{ActionDraft, ActionRecord, ActionType};
pub use link::{LinkDetails, LinkEntry, LinkStatus, LinkType, ObjectType, RawEntry};
