//! drivebackup CLI - Zip a local folder and upload it to Google Drive.
//!
//! The single argument is a JSON config file naming the folder to archive
//! and the Drive folder that receives the archive.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use drivebackup_app::{google_job, BackupReport};
use drivebackup_common::{BackupConfig, Error};

/// Exit status for a malformed command line.
const USAGE_EXIT: u8 = 1;
/// Exit status for failures outside the backup error taxonomy.
const INTERNAL_EXIT: u8 = 70;

#[derive(Parser, Debug)]
#[command(name = "drivebackup")]
#[command(about = "Zip a folder and back it up to Google Drive")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file.
    config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding credentials.json and token.json (overrides the config).
    #[arg(long, value_name = "DIR")]
    secrets_dir: Option<PathBuf>,

    /// Keep the local archive after a successful upload.
    #[arg(long)]
    keep_archive: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(USAGE_EXIT),
            };
        }
    };

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    match run(cli).await {
        Ok(report) => {
            debug!(
                "Archived {} files ({} bytes)",
                report.entries.len(),
                report.bytes_in
            );
            ExitCode::SUCCESS
        }
        Err(e) => ExitCode::from(report_failure(&e)),
    }
}

async fn run(cli: Cli) -> Result<BackupReport> {
    let mut config = BackupConfig::load(&cli.config)?;
    if let Some(dir) = cli.secrets_dir {
        config.secrets_dir = dir;
    }
    debug!(
        "Backing up {} into Drive folder {}",
        config.folder_to_zip.display(),
        config.backup_folder_id
    );

    let report = google_job(config)
        .keep_archive(cli.keep_archive)
        .run()
        .await
        .context("Backup failed")?;

    Ok(report)
}

/// Print a labeled diagnostic and pick the exit status for `error`.
fn report_failure(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<Error>() {
        Some(e) if e.is_precondition() => {
            eprintln!("Precondition failed: {}", e);
            e.exit_code()
        }
        Some(e) => {
            eprintln!("Unexpected error: {}", e);
            e.exit_code()
        }
        None => {
            eprintln!("Unexpected error: {:#}", error);
            INTERNAL_EXIT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_positional_argument() {
        let cli = Cli::try_parse_from(["drivebackup", "config.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert!(!cli.verbose);
        assert!(!cli.keep_archive);
        assert!(cli.secrets_dir.is_none());
    }

    #[test]
    fn test_wrong_argument_count_is_usage_error() {
        assert!(Cli::try_parse_from(["drivebackup"]).is_err());
        let err = Cli::try_parse_from(["drivebackup", "a.json", "b.json"]).unwrap_err();
        assert!(!matches!(
            err.kind(),
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
        ));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "drivebackup",
            "-v",
            "--secrets-dir",
            "/etc/drivebackup",
            "--keep-archive",
            "config.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.keep_archive);
        assert_eq!(cli.secrets_dir, Some(PathBuf::from("/etc/drivebackup")));
    }

    #[test]
    fn test_failure_exit_codes() {
        let missing = anyhow::Error::new(Error::ConfigNotFound(PathBuf::from("c.json")));
        assert_eq!(report_failure(&missing), 10);

        let wrapped = anyhow::Error::new(Error::Api {
            status: 500,
            message: "backend".to_string(),
        })
        .context("Backup failed");
        assert_eq!(report_failure(&wrapped), 42);
    }
}
