//! Backups of local client configuration.
//!
//! Plays that install a cluster-side component can also rewrite the
//! operator's local client directory for it. The existing directory is
//! moved to a timestamped sibling first.

use chrono::{DateTime, Local};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{CairnError, Result};

/// Timestamp format of backup suffixes.
const BACKUP_TIMESTAMP: &str = "%Y-%m-%d-%H-%M-%S";

/// Returns `<dir>.backup-<timestamp>`.
#[must_use]
pub fn backup_path(dir: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = dir
        .file_name()
        .map_or_else(OsString::new, std::ffi::OsStr::to_os_string);
    name.push(format!(".backup-{}", at.format(BACKUP_TIMESTAMP)));
    dir.with_file_name(name)
}

/// Moves `src` to `dest` if it exists.
///
/// Returns `false` when there was nothing to back up.
///
/// # Errors
///
/// Returns an error if `dest` already exists or the move fails.
pub fn backup_directory(src: &Path, dest: &Path) -> Result<bool> {
    if !src.exists() {
        return Ok(false);
    }

    if dest.exists() {
        return Err(CairnError::internal(format!(
            "backup destination {} already exists",
            dest.display()
        )));
    }

    std::fs::rename(src, dest)?;
    info!("Backed up {} to {}", src.display(), dest.display());
    Ok(true)
}
