//! OAuth2 credential lifecycle: load, validate, refresh, authorize, persist.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use drivebackup_common::{Error, Result};

/// Token endpoint recorded in token files that do not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// A token is treated as expired this long before its expiry instant.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Persisted authorization for a single user.
///
/// Uses the "authorized user" JSON layout, so token files written by other
/// Google client libraries load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Access token for API requests.
    #[serde(default)]
    pub token: String,
    /// Refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Endpoint that issues and refreshes tokens.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    /// OAuth2 client the token was issued to.
    pub client_id: String,
    /// Secret of that client.
    pub client_secret: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// When the access token expires; `None` means it does not.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl StoredToken {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expiry
            .map(|at| at < Utc::now() + Duration::minutes(EXPIRY_MARGIN_MINUTES))
            .unwrap_or(false)
    }

    /// Usable as-is for API requests.
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.is_expired()
    }

    /// The refresh token, if one is held.
    pub fn refresh_secret(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// What a cached token allows the credential manager to do.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenState {
    /// No token file, or one that could not be read.
    NoToken,
    /// The token can be used as-is.
    Valid(StoredToken),
    /// Expired, but holds a refresh token.
    ExpiredRefreshable(StoredToken),
    /// Neither valid nor refreshable.
    Unrefreshable,
}

impl TokenState {
    /// Classify a loaded token.
    pub fn classify(token: Option<StoredToken>) -> Self {
        match token {
            None => TokenState::NoToken,
            Some(token) if token.is_valid() => TokenState::Valid(token),
            Some(token) if token.is_expired() && token.refresh_secret().is_some() => {
                TokenState::ExpiredRefreshable(token)
            }
            Some(_) => TokenState::Unrefreshable,
        }
    }
}

/// Secrets directory holding `credentials.json` and `token.json`.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    /// Create a store rooted at `dir`. Nothing is touched on disk.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The secrets directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cached token.
    pub fn token_path(&self) -> PathBuf {
        self.dir.join("token.json")
    }

    /// Path of the operator-provided OAuth2 client secrets.
    pub fn client_secrets_path(&self) -> PathBuf {
        self.dir.join("credentials.json")
    }

    /// Load the cached token.
    ///
    /// A missing file yields `None`; so does a file that cannot be read or
    /// parsed, after a warning.
    pub async fn load(&self) -> Option<StoredToken> {
        let path = self.token_path();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cached token at {}", path.display());
                return None;
            }
            Err(e) => {
                warn!("Unable to read token file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Ignoring malformed token file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist `token`, creating the secrets directory if needed.
    pub async fn save(&self, token: &StoredToken) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(token)?;
        tokio::fs::write(self.token_path(), json).await?;

        debug!("Token saved to {}", self.token_path().display());
        Ok(())
    }
}

/// Talks to the authorization server on behalf of the credential manager.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Exchange the refresh token held by `token` for a fresh access token.
    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken>;

    /// Run the interactive consent flow using the client secrets at `client_secrets`.
    async fn authorize(&self, client_secrets: &Path) -> Result<StoredToken>;
}

/// Keeps a usable token across runs.
///
/// | cached token              | action                          |
/// |---------------------------|---------------------------------|
/// | valid                     | reuse, no network               |
/// | expired, refreshable      | one refresh call, then persist  |
/// | absent or unrefreshable   | interactive flow, then persist  |
pub struct CredentialManager<A> {
    store: TokenStore,
    authorizer: A,
}

impl<A: Authorizer> CredentialManager<A> {
    /// Create a credential manager over `store`.
    pub fn new(store: TokenStore, authorizer: A) -> Self {
        Self { store, authorizer }
    }

    /// The backing token store.
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Obtain a usable token.
    ///
    /// # Postconditions
    /// - The returned token is valid
    /// - If the token changed, it has been written to the token store
    ///
    /// # Errors
    /// - `MissingClientSecrets` if interactive authorization is needed and
    ///   the client secrets file is absent
    /// - `Authentication` if refresh or authorization is rejected
    pub async fn credential(&self) -> Result<StoredToken> {
        let token = match TokenState::classify(self.store.load().await) {
            TokenState::Valid(token) => {
                debug!("Using cached access token");
                return Ok(token);
            }
            TokenState::ExpiredRefreshable(token) => {
                info!("Refreshing expired access token");
                self.authorizer.refresh(&token).await?
            }
            TokenState::NoToken | TokenState::Unrefreshable => {
                let secrets = self.store.client_secrets_path();
                if !secrets.exists() {
                    return Err(Error::MissingClientSecrets(secrets));
                }

                info!("No usable token, starting interactive authorization");
                self.authorizer.authorize(&secrets).await?
            }
        };

        self.store.save(&token).await?;
        Ok(token)
    }
}
