//! Common utilities and types shared across the drivebackup crates.
//!
//! This module provides the error taxonomy every step of a backup run reports
//! through, the backup configuration loader, and small identifier types.

pub mod config;
pub mod error;
pub mod types;

pub use config::BackupConfig;
pub use error::{Error, Result};
pub use types::FolderId;
