//! One backup run: archive a folder and upload it.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use drivebackup_archive::{timestamped_archive_path, zip_folder};
use drivebackup_common::{BackupConfig, Error, Result};
use drivebackup_storage::gdrive::{DriveConnector, GoogleAuthorizer};
use drivebackup_storage::{
    Authorizer, Connector, CredentialManager, RemoteFile, RemoteStore, TokenStore,
};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    /// Local archive that was uploaded.
    pub archive_path: PathBuf,
    /// Name the archive was uploaded under.
    pub archive_name: String,
    /// Identifier assigned by the remote store.
    pub file_id: String,
    /// Entry names stored in the archive.
    pub entries: Vec<String>,
    /// Uncompressed bytes archived.
    pub bytes_in: u64,
    /// Whether the local archive was deleted afterwards.
    pub removed: bool,
}

/// Archives the configured folder and uploads it.
pub struct BackupJob<A, C> {
    config: BackupConfig,
    credentials: CredentialManager<A>,
    connector: C,
    keep_archive: bool,
}

/// A job talking to Google Drive with the secrets in `config.secrets_dir`.
pub fn google_job(config: BackupConfig) -> BackupJob<GoogleAuthorizer, DriveConnector> {
    let store = TokenStore::new(&config.secrets_dir);
    let credentials = CredentialManager::new(store, GoogleAuthorizer::new());
    BackupJob::new(config, credentials, DriveConnector::new())
}

impl<A: Authorizer, C: Connector> BackupJob<A, C> {
    /// Create a job.
    pub fn new(config: BackupConfig, credentials: CredentialManager<A>, connector: C) -> Self {
        Self {
            config,
            credentials,
            connector,
            keep_archive: false,
        }
    }

    /// Keep the local archive after a successful upload.
    pub fn keep_archive(mut self, keep: bool) -> Self {
        self.keep_archive = keep;
        self
    }

    /// The configuration this job runs with.
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Run a backup into a freshly named archive under `archive_dir`.
    pub async fn run(&self) -> Result<BackupReport> {
        let archive_path =
            timestamped_archive_path(&self.config.archive_dir, &self.config.archive_prefix);
        self.run_to(archive_path).await
    }

    /// Run a backup into the archive at `archive_path`.
    ///
    /// # Postconditions
    /// - On success the archive was uploaded and, unless kept, deleted; a
    ///   failed deletion is logged and reported as `removed: false`
    /// - On failure any archive already written stays on disk
    ///
    /// # Errors
    /// - Archiving errors (`SourceNotFound`, `NotADirectory`, `ArchiveWriteFailed`)
    /// - Credential errors (`MissingClientSecrets`, `Authentication`)
    /// - Upload errors (`LocalFileNotFound`, `UploadFailed`, network and API errors)
    pub async fn run_to(&self, archive_path: PathBuf) -> Result<BackupReport> {
        let source = self.config.folder_to_zip.clone();
        let destination = archive_path.clone();
        let summary = tokio::task::spawn_blocking(move || zip_folder(&source, &destination))
            .await
            .map_err(|e| Error::ArchiveWriteFailed(format!("Archiving task failed: {}", e)))??;

        let archive_name = summary
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::ArchiveWriteFailed(format!(
                    "Archive path {} has no file name",
                    summary.path.display()
                ))
            })?;
        println!("Folder zipped as {}", summary.path.display());

        let remote = self.upload(&summary.path, &archive_name).await?;
        info!("Backup uploaded with file ID {}", remote.id);
        println!(
            "File '{}' uploaded successfully with ID: {}",
            archive_name, remote.id
        );

        // Cleanup failure does not fail an uploaded backup.
        let removed = if self.keep_archive {
            false
        } else {
            match tokio::fs::remove_file(&summary.path).await {
                Ok(()) => {
                    println!("Temporary file {} removed.", summary.path.display());
                    true
                }
                Err(e) => {
                    warn!(
                        "Could not remove local archive {}: {}",
                        summary.path.display(),
                        e
                    );
                    false
                }
            }
        };

        Ok(BackupReport {
            archive_path: summary.path,
            archive_name,
            file_id: remote.id,
            entries: summary.entries,
            bytes_in: summary.bytes_in,
            removed,
        })
    }

    /// Upload `local` as `name` into the configured folder.
    ///
    /// # Errors
    /// - `LocalFileNotFound` before any credential work if `local` is missing
    pub async fn upload(&self, local: &Path, name: &str) -> Result<RemoteFile> {
        if !local.exists() {
            return Err(Error::LocalFileNotFound(local.to_path_buf()));
        }

        let credential = self.credentials.credential().await?;
        let store = self.connector.connect(&credential)?;
        info!("Uploading {} via {}", name, store.name());

        store
            .upload(local, name, &self.config.backup_folder_id)
            .await
    }
}
