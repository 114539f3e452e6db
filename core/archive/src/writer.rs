//! Zip archive creation from a directory tree.

use chrono::{DateTime, Datelike, Local, Timelike};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use drivebackup_common::{Error, Result};

/// Entries of this size or larger need ZIP64 extensions.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Outcome of archiving a directory.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Where the archive was written.
    pub path: PathBuf,
    /// Entry names in the order they were written.
    pub entries: Vec<String>,
    /// Total uncompressed bytes read from the source tree.
    pub bytes_in: u64,
}

/// Archive every regular file below `source` into a new zip at `destination`.
///
/// Entries are named by their path relative to `source`, joined with `/`,
/// and written in file-name order so the same tree always yields the same
/// entry sequence. Symlinks and special files are skipped; directories are
/// implied by their files and not stored on their own.
///
/// # Errors
/// - `SourceNotFound` if `source` does not exist (nothing is created)
/// - `NotADirectory` if `source` is not a directory (nothing is created)
/// - `ArchiveWriteFailed` if the zip cannot be written or is missing afterwards
pub fn zip_folder(source: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<ArchiveSummary> {
    let source = source.as_ref();
    let destination = destination.as_ref();

    if !source.exists() {
        return Err(Error::SourceNotFound(source.to_path_buf()));
    }
    if !source.is_dir() {
        return Err(Error::NotADirectory(source.to_path_buf()));
    }

    let file = File::create(destination).map_err(|e| write_failed(destination, e))?;
    // The destination may sit inside the tree being archived.
    let own_path = fs::canonicalize(destination).ok();

    let mut writer = ZipWriter::new(file);
    let mut entries = Vec::new();
    let mut bytes_in = 0u64;

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        let path = entry.path();

        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() {
            warn!("Skipping symlink {}", path.display());
            continue;
        }
        if !file_type.is_file() {
            warn!("Skipping special file {}", path.display());
            continue;
        }
        if is_own_archive(path, own_path.as_deref()) {
            debug!("Skipping the archive itself: {}", path.display());
            continue;
        }

        let relative = path.strip_prefix(source).map_err(|_| {
            Error::ArchiveWriteFailed(format!(
                "'{}' is outside of '{}'",
                path.display(),
                source.display()
            ))
        })?;
        let name = entry_name(relative);
        let metadata = entry.metadata().map_err(io::Error::from)?;

        writer
            .start_file(name.as_str(), entry_options(&metadata))
            .map_err(|e| write_failed(destination, e))?;

        let mut input = File::open(path)?;
        bytes_in += io::copy(&mut input, &mut writer)?;

        debug!("Added {} ({} bytes)", name, metadata.len());
        entries.push(name);
    }

    writer.finish().map_err(|e| write_failed(destination, e))?;

    if !destination.exists() {
        return Err(Error::ArchiveWriteFailed(format!(
            "'{}' was not created",
            destination.display()
        )));
    }

    info!(
        "Folder {} zipped as {} ({} files, {} bytes)",
        source.display(),
        destination.display(),
        entries.len(),
        bytes_in
    );

    Ok(ArchiveSummary {
        path: destination.to_path_buf(),
        entries,
        bytes_in,
    })
}

fn write_failed(destination: &Path, e: impl std::fmt::Display) -> Error {
    Error::ArchiveWriteFailed(format!("'{}': {}", destination.display(), e))
}

fn is_own_archive(path: &Path, own_path: Option<&Path>) -> bool {
    match own_path {
        Some(own) if path.file_name() == own.file_name() => fs::canonicalize(path)
            .map(|p| p == own)
            .unwrap_or(false),
        _ => false,
    }
}

/// Zip entry name for a path relative to the archive root.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_options(metadata: &fs::Metadata) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(metadata.len() >= ZIP64_THRESHOLD);

    if let Some(modified) = metadata.modified().ok().and_then(zip_timestamp) {
        options = options.last_modified_time(modified);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode());
    }

    options
}

/// Zip timestamps are local wall-clock time with two-second resolution.
fn zip_timestamp(time: SystemTime) -> Option<zip::DateTime> {
    let local: DateTime<Local> = time.into();

    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}
