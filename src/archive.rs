//! File lifecycle: archive, reject, and retention purge.
//!
//! Processed files are moved (never copied) into the archive directory with
//! their original name and purged once their modification time falls
//! outside the retention window. Unusable files go to the rejection
//! directory, which is never purged.

use anyhow::Result;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::config::Config;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct Archiver {
    archive_dir: PathBuf,
    rejected_dir: PathBuf,
}

/// Result of one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

impl Archiver {
    pub fn new(archive_dir: impl Into<PathBuf>, rejected_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            rejected_dir: rejected_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn rejected_dir(&self) -> &Path {
        &self.rejected_dir
    }

    /// Moves `path` into the archive and restarts its retention clock.
    pub fn archive(&self, path: &Path) -> io::Result<PathBuf> {
        let dest = move_into(path, &self.archive_dir)?;
        if let Err(e) = touch(&dest) {
            tracing::warn!(path = %dest.display(), error = %e, "could not reset archived file mtime");
        }
        Ok(dest)
    }

    /// Moves `path` aside into the rejection directory.
    pub fn reject(&self, path: &Path) -> io::Result<PathBuf> {
        move_into(path, &self.rejected_dir)
    }

    pub fn purge_older_than(&self, window: Duration) -> PurgeReport {
        self.purge_older_than_at(window, SystemTime::now(), false)
    }

    /// Removes archived files last modified before `now - window`.
    ///
    /// Individual failures are logged and counted; the sweep always runs to
    /// the end. With `dry_run` the eligible files are reported, not removed.
    pub fn purge_older_than_at(&self, window: Duration, now: SystemTime, dry_run: bool) -> PurgeReport {
        let mut report = PurgeReport::default();
        if !self.archive_dir.is_dir() {
            return report;
        }
        let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);

        for entry in WalkDir::new(&self.archive_dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "could not list archive entry");
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_in_flight(entry.path()) {
                continue;
            }
            report.scanned += 1;

            let modified = match entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "could not stat archived file");
                    report.failed += 1;
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            if dry_run {
                report.removed.push(entry.path().to_path_buf());
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::info!(path = %entry.path().display(), "purged archived file");
                    report.removed.push(entry.path().to_path_buf());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "could not purge archived file");
                    report.failed += 1;
                }
            }
        }

        report.removed.sort();
        report
    }
}

/// CLI entry point for `srwatch purge`: runs one retention sweep.
pub fn run_purge(config: &Config, dry_run: bool) -> Result<()> {
    let archiver = Archiver::new(&config.archive.path, &config.archive.rejected_path);
    let report = archiver.purge_older_than_at(config.retention(), SystemTime::now(), dry_run);

    println!("purge{}", if dry_run { " (dry run)" } else { "" });
    println!("  archive: {}", archiver.archive_dir().display());
    println!("  retention_days: {}", config.archive.retention_days);
    println!("  scanned: {}", report.scanned);
    for path in &report.removed {
        println!("  - {}", path.display());
    }
    println!(
        "  {}: {}",
        if dry_run { "would remove" } else { "removed" },
        report.removed.len()
    );
    println!("  failed: {}", report.failed);
    println!("ok");
    Ok(())
}

/// Hidden temp files written by a cross-device move.
fn is_in_flight(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

fn move_into(from: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = from
        .file_name()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no file name"))?;
    fs::create_dir_all(dir)?;
    let dest = dir.join(name);

    match fs::rename(from, &dest) {
        Ok(()) => Ok(dest),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(_) => {
            // Cross-device: stage under a hidden name so a concurrent purge
            // never sees a half-copied file.
            let staging = dir.join(format!(".{}{}", name.to_string_lossy(), PARTIAL_SUFFIX));
            fs::copy(from, &staging)?;
            fs::rename(&staging, &dest)?;
            fs::remove_file(from)?;
            Ok(dest)
        }
    }
}

fn touch(path: &Path) -> io::Result<()> {
    fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}
