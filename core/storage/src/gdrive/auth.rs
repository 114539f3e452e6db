//! OAuth2 authentication and token management for Google Drive.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    reqwest, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use drivebackup_common::{Error, Result};

use super::callback::CallbackListener;
use super::secrets::{ClientSecrets, DEFAULT_AUTH_URI};
use crate::credentials::{Authorizer, StoredToken};

/// Google Drive OAuth2 scope: access to files created by this application.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Client with both the authorization and the token endpoint configured.
type GoogleClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    /// Redirect URL for the consent flow; not needed for refreshing.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl AuthConfig {
    /// Configuration for the consent flow, redirecting to `redirect_url`.
    pub fn from_secrets(secrets: &ClientSecrets, redirect_url: impl Into<String>) -> Self {
        Self {
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            auth_url: secrets.auth_uri.clone(),
            token_url: secrets.token_uri.clone(),
            redirect_url: Some(redirect_url.into()),
        }
    }

    /// Configuration for refreshing `token` with the client it was issued to.
    pub fn from_token(token: &StoredToken) -> Self {
        Self {
            client_id: token.client_id.clone(),
            client_secret: token.client_secret.clone(),
            auth_url: DEFAULT_AUTH_URI.to_string(),
            token_url: token.token_uri.clone(),
            redirect_url: None,
        }
    }
}

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: GoogleClient,
    http: reqwest::Client,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_auth_uri(
                AuthUrl::new(config.auth_url.clone())
                    .map_err(|e| Error::Authentication(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| Error::Authentication(format!("Invalid token URL: {}", e)))?,
            );

        if let Some(redirect) = &config.redirect_url {
            client = client.set_redirect_uri(
                RedirectUrl::new(redirect.clone())
                    .map_err(|e| Error::Authentication(format!("Invalid redirect URL: {}", e)))?,
            );
        }

        // Following redirects from the token endpoint opens the client to SSRF.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
        })
    }

    /// Generate the authorization URL for the user to visit.
    ///
    /// Returns the URL and the CSRF state that the redirect must echo.
    pub fn authorization_url(&self, pkce_challenge: PkceCodeChallenge) -> (String, String) {
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        (auth_url.to_string(), csrf_token.secret().clone())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - Invalid authorization code
    /// - Network errors
    pub async fn exchange_code(&self, code: &str, verifier: PkceCodeVerifier) -> Result<StoredToken> {
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        Ok(self.to_stored(&token_result, None))
    }

    /// Refresh the access token held by `token`.
    ///
    /// # Errors
    /// - `token` holds no refresh token
    /// - Invalid or revoked refresh token
    /// - Network errors
    pub async fn refresh_token(&self, token: &StoredToken) -> Result<StoredToken> {
        let refresh = token.refresh_secret().ok_or_else(|| {
            Error::Authentication("Token cannot be refreshed: no refresh token".to_string())
        })?;

        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        let mut refreshed = self.to_stored(&token_result, Some(refresh));
        if refreshed.scopes.is_empty() {
            refreshed.scopes = token.scopes.clone();
        }

        Ok(refreshed)
    }

    fn to_stored(&self, response: &BasicTokenResponse, previous_refresh: Option<&str>) -> StoredToken {
        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expiry = Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        // Refresh responses usually omit the refresh token; keep the old one.
        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(String::from));

        let scopes = response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_default();

        StoredToken {
            token: response.access_token().secret().clone(),
            refresh_token,
            token_uri: self.config.token_url.clone(),
            client_id: self.config.client_id.clone(),
            client_secret: self.config.client_secret.clone(),
            scopes,
            expiry: Some(expiry),
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

/// [`Authorizer`] backed by Google's OAuth2 endpoints.
#[derive(Debug, Clone)]
pub struct GoogleAuthorizer {
    open_browser: bool,
}

impl GoogleAuthorizer {
    pub fn new() -> Self {
        Self { open_browser: true }
    }

    /// Only print the consent URL instead of also opening a browser.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }
}

impl Default for GoogleAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authorizer for GoogleAuthorizer {
    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken> {
        let manager = AuthManager::new(AuthConfig::from_token(token))?;
        manager.refresh_token(token).await
    }

    async fn authorize(&self, client_secrets: &Path) -> Result<StoredToken> {
        let secrets = ClientSecrets::load(client_secrets).await?;
        let listener = CallbackListener::bind().await?;
        let manager = AuthManager::new(AuthConfig::from_secrets(&secrets, listener.redirect_url()))?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, state) = manager.authorization_url(pkce_challenge);

        println!("Please visit this URL to authorize this application:\n  {}\n", url);
        if self.open_browser {
            if let Err(e) = open::that(&url) {
                warn!("Could not open a browser: {}", e);
            }
        }

        info!("Waiting for the authorization redirect on port {}", listener.port());
        let code = listener.accept().await?.into_code(&state)?;

        manager.exchange_code(&code, pkce_verifier).await
    }
}
