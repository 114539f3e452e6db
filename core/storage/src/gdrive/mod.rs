//! Google Drive backend for drivebackup.
//!
//! This module provides:
//! - OAuth2 authorization (installed-app consent flow with PKCE, token refresh)
//! - A one-shot loopback listener for the consent redirect
//! - Resumable uploads of local files into a Drive folder

pub mod auth;
pub mod callback;
pub mod client;
pub mod secrets;

pub use auth::{AuthConfig, AuthManager, GoogleAuthorizer, DRIVE_SCOPE};
pub use callback::{AuthCallback, CallbackListener};
pub use client::{DriveClient, DriveConnector, UploadedFile};
pub use secrets::ClientSecrets;
