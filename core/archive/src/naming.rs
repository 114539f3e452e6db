//! Timestamped archive names.

use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};

/// Format of the timestamp embedded in archive names.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Build the archive file name `<prefix>_<YYYY-MM-DD_HH-MM-SS>.zip`.
pub fn archive_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{}_{}.zip", prefix, at.format(TIMESTAMP_FORMAT))
}

/// Archive path inside `dir`, stamped with the current local time.
pub fn timestamped_archive_path(dir: impl AsRef<Path>, prefix: &str) -> PathBuf {
    dir.as_ref()
        .join(archive_name(prefix, Local::now().naive_local()))
}
