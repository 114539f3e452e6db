//! Directory archiving for drivebackup.
//!
//! Turns a local directory tree into a single deflate-compressed zip file
//! whose entries mirror the tree's relative paths, and names those archives
//! with a sortable timestamp.

pub mod naming;
pub mod writer;

pub use naming::{archive_name, timestamped_archive_path};
pub use writer::{zip_folder, ArchiveSummary};
