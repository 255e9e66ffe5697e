/// LinkSleuth Core - link scanning, validation, mutation and undo.
///
/// This crate contains all business logic with zero UI dependencies.
/// It is designed to be reusable across different frontends (GUI, CLI, TUI).
///
/// # Modules
///
/// - [`model`] - Link entries, action records and NTFS path rules.
/// - [`scanner`] - Background scan sessions with streamed, validated results.
/// - [`validator`] - Target resolution and link health classification.
/// - [`mutation`] - Create, delete and retarget links through a `LinkOperator`.
/// - [`history`] - The action log, paginated loads and "undo last".
/// - [`platform`] - Windows volume enumeration, elevation and reparse queries.
/// - [`config`] - Startup configuration read from TOML.
/// - [`error`] - Error types shared by the modules above.
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod mutation;
pub mod platform;
pub mod scanner;
pub mod validator;
