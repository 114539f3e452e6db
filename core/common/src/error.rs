//! Common error types for drivebackup.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for backup operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration file does not exist.
    #[error("Config file '{}' does not exist", .0.display())]
    ConfigNotFound(PathBuf),

    /// A required configuration key is absent.
    #[error("'{0}' is missing in the config")]
    MissingField(String),

    /// The configuration is present but malformed.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The directory to archive does not exist.
    #[error("Folder path '{}' does not exist", .0.display())]
    SourceNotFound(PathBuf),

    /// The path to archive exists but is not a directory.
    #[error("Path '{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// The archive could not be written.
    #[error("Failed to create zip file: {0}")]
    ArchiveWriteFailed(String),

    /// The OAuth2 client secrets file needed for interactive authorization is absent.
    #[error("Missing client secrets file '{}' for authentication", .0.display())]
    MissingClientSecrets(PathBuf),

    /// Authorization failed or was rejected.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The file to upload does not exist.
    #[error("File path '{}' does not exist", .0.display())]
    LocalFileNotFound(PathBuf),

    /// The upload finished without producing a remote file.
    #[error("File upload failed: {0}")]
    UploadFailed(String),

    /// Transport-level failure talking to a remote service.
    #[error("Network error: {0}")]
    Network(String),

    /// A remote API answered with a non-success status.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error is a violated precondition (bad input or missing
    /// local resource) rather than an unexpected runtime failure.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound(_)
                | Error::MissingField(_)
                | Error::InvalidConfig(_)
                | Error::SourceNotFound(_)
                | Error::NotADirectory(_)
                | Error::ArchiveWriteFailed(_)
                | Error::MissingClientSecrets(_)
                | Error::LocalFileNotFound(_)
                | Error::UploadFailed(_)
        )
    }

    /// Process exit status reported for this error kind.
    ///
    /// `1` is reserved for command line usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::ConfigNotFound(_) => 10,
            Error::MissingField(_) => 11,
            Error::InvalidConfig(_) => 12,
            Error::SourceNotFound(_) => 20,
            Error::NotADirectory(_) => 21,
            Error::ArchiveWriteFailed(_) => 22,
            Error::MissingClientSecrets(_) => 30,
            Error::Authentication(_) => 31,
            Error::LocalFileNotFound(_) => 40,
            Error::UploadFailed(_) => 41,
            Error::Network(_) | Error::Api { .. } => 42,
            Error::Io(_) | Error::Serialization(_) => 70,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
