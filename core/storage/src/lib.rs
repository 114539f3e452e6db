//! Remote storage and credentials for drivebackup.
//!
//! This module provides the credential manager that keeps an OAuth2 token
//! usable across runs, a trait-based interface for the remote store that
//! receives archives, the Google Drive implementation of both, and an
//! in-memory store for tests.
//!
//! # Design Principles
//! - The authorization server sits behind [`Authorizer`], so the token
//!   lifecycle is testable without network access
//! - Remote stores are built from a credential by a [`Connector`]
//! - Unified error semantics: every failure is a `drivebackup_common::Error`

pub mod credentials;
pub mod gdrive;
pub mod memory;
pub mod provider;

#[cfg(test)]
pub(crate) mod test_server;

pub use credentials::{Authorizer, CredentialManager, StoredToken, TokenState, TokenStore};
pub use memory::{MemoryStore, RecordedUpload};
pub use provider::{Connector, RemoteFile, RemoteStore};
