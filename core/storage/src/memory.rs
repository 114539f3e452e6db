//! In-memory remote store for testing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, RwLock};

use drivebackup_common::{Error, FolderId, Result};

use crate::credentials::StoredToken;
use crate::provider::{Connector, RemoteFile, RemoteStore};

/// One upload received by a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub file: RemoteFile,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    uploads: Vec<RecordedUpload>,
    access_tokens: Vec<String>,
}

/// In-memory remote store.
///
/// Useful for testing and development. Clones share the same storage, so a
/// test can keep one handle while the code under test uploads through
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    failure: Option<String>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose uploads fail with an API error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Uploads received so far.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state
            .read()
            .map(|s| s.uploads.clone())
            .unwrap_or_default()
    }

    /// Access tokens this store was connected with, in order.
    pub fn access_tokens(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| s.access_tokens.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(&self, local: &Path, name: &str, folder: &FolderId) -> Result<RemoteFile> {
        if !local.exists() {
            return Err(Error::LocalFileNotFound(local.to_path_buf()));
        }

        if let Some(message) = &self.failure {
            return Err(Error::Api {
                status: 500,
                message: message.clone(),
            });
        }

        let data = tokio::fs::read(local).await?;

        let mut state = self
            .state
            .write()
            .map_err(|_| Error::UploadFailed("memory store lock poisoned".to_string()))?;

        let file = RemoteFile {
            id: format!("mem-{}", state.uploads.len() + 1),
            name: name.to_string(),
            parents: vec![folder.to_string()],
        };
        state.uploads.push(RecordedUpload {
            file: file.clone(),
            data,
        });

        Ok(file)
    }
}

impl Connector for MemoryStore {
    type Store = MemoryStore;

    fn connect(&self, credential: &StoredToken) -> Result<MemoryStore> {
        if let Ok(mut state) = self.state.write() {
            state.access_tokens.push(credential.token.clone());
        }
        Ok(self.clone())
    }
}
