//! Backup orchestration for drivebackup.
//!
//! Ties the archiver, the credential manager and a remote store together
//! into one sequential run: archive, authorize, upload, clean up.

pub mod backup;

pub use backup::{google_job, BackupJob, BackupReport};
