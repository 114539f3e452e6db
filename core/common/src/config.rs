//! Backup configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, FolderId, Result};

/// Keys that must be present in every configuration file, in the order
/// they are checked.
pub const REQUIRED_FIELDS: [&str; 2] = ["folder_to_zip", "backup_folder_id"];

/// Default directory holding `credentials.json` and `token.json`.
pub const DEFAULT_SECRETS_DIR: &str = "secrets";
/// Default archive name prefix.
pub const DEFAULT_ARCHIVE_PREFIX: &str = "obsidian";

/// Configuration of one backup run.
///
/// ```json
/// { "folder_to_zip": "/home/me/notes", "backup_folder_id": "1AbC..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Local directory to archive.
    pub folder_to_zip: PathBuf,
    /// Remote folder that receives the archive.
    pub backup_folder_id: FolderId,
    /// Directory with the OAuth2 client secrets and the cached token.
    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,
    /// Prefix of the timestamped archive name.
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    /// Directory the temporary archive is written to.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SECRETS_DIR)
}

fn default_archive_prefix() -> String {
    DEFAULT_ARCHIVE_PREFIX.to_string()
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from(".")
}

impl BackupConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    /// - `ConfigNotFound` if `path` does not exist
    /// - `MissingField` if a required key is absent
    /// - `InvalidConfig` if the file is not a JSON object or a value has the wrong type
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a configuration from its JSON text.
    pub fn from_json(contents: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(contents)
            .map_err(|e| Error::InvalidConfig(format!("not valid JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidConfig("expected a JSON object".to_string()))?;

        for field in REQUIRED_FIELDS {
            if !object.contains_key(field) {
                return Err(Error::MissingField(field.to_string()));
            }
        }

        let config: Self =
            serde_json::from_value(value).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        FolderId::new(self.backup_folder_id.as_str())?;

        if self.archive_prefix.is_empty()
            || self.archive_prefix.contains('/')
            || self.archive_prefix.contains('\\')
        {
            return Err(Error::InvalidConfig(format!(
                "archive_prefix '{}' must be a non-empty file name",
                self.archive_prefix
            )));
        }

        Ok(())
    }
}
