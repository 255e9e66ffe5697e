//! Startup configuration.
//!
//! Read once at startup. Only `scan.excluded_paths` influences the core (the
//! enumerators skip those subtrees); the rest is consumed by the binary.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name looked up next to the executable when no path is given.
pub const CONFIG_FILE_NAME: &str = "linksleuth.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Volume scanned when none is given explicitly, e.g. `C:`.
    pub default_volume: String,
    /// Subtrees the walker never descends into.
    pub excluded_paths: Vec<String>,
    /// Scan `default_volume` as soon as the application starts.
    pub auto_scan_on_start: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_volume: default_system_drive(),
            excluded_paths: vec![r"C:\Windows\WinSxS".to_string()],
            auto_scan_on_start: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// JSON-lines action log. Relative paths resolve against the directory
    /// holding the config file.
    pub file: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: "linksleuth-history.jsonl".to_string(),
        }
    }
}

impl Config {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text, &origin),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {origin}, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: origin,
                source,
            }),
        }
    }
}

/// `%SystemDrive%` when it looks like a drive, otherwise `C:`.
fn default_system_drive() -> String {
    std::env::var("SystemDrive")
        .ok()
        .map(|value| value.trim().trim_end_matches('\\').to_string())
        .filter(|value| value.len() == 2 && value.ends_with(':'))
        .unwrap_or_else(|| "C:".to_string())
}
