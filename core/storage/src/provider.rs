//! Remote store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use drivebackup_common::{FolderId, Result};

use crate::credentials::StoredToken;

/// A file created on the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Server-assigned identifier.
    pub id: String,
    /// Name the file was stored under.
    pub name: String,
    /// Folders the file was placed in.
    pub parents: Vec<String>,
}

/// Destination that accepts uploaded archives.
///
/// Implementations must handle their own transport; they never retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Upload the file at `local` as a new file called `name` inside `folder`.
    ///
    /// # Preconditions
    /// - `local` exists and is readable
    ///
    /// # Postconditions
    /// - A new remote file exists and its identifier is returned
    ///
    /// # Errors
    /// - `LocalFileNotFound` if `local` is missing
    /// - `UploadFailed` if the server did not report a file identifier
    /// - Network/API errors
    async fn upload(&self, local: &Path, name: &str, folder: &FolderId) -> Result<RemoteFile>;
}

/// Builds a [`RemoteStore`] from an authorized credential.
pub trait Connector {
    /// Store produced by this connector.
    type Store: RemoteStore;

    /// Construct a client acting with `credential`.
    fn connect(&self, credential: &StoredToken) -> Result<Self::Store>;
}
