//! OAuth2 client secrets as downloaded from the Google Cloud console.

use serde::Deserialize;
use std::path::Path;

use drivebackup_common::{Error, Result};

use crate::credentials::DEFAULT_TOKEN_URI;

/// Default Google authorization endpoint.
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Client identity used to start the consent flow.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The console wraps the secrets in a key naming the application type.
#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Read a client secrets file.
    ///
    /// # Errors
    /// - `MissingClientSecrets` if `path` does not exist
    /// - `Authentication` if the file has neither an `installed` nor a `web` section
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingClientSecrets(path.to_path_buf()));
        }

        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    /// Parse the contents of a client secrets file.
    pub fn from_json(contents: &str) -> Result<Self> {
        let file: SecretsFile = serde_json::from_str(contents)?;

        file.installed.or(file.web).ok_or_else(|| {
            Error::Authentication(
                "client secrets must contain an 'installed' or 'web' section".to_string(),
            )
        })
    }
}
