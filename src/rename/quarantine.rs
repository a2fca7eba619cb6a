//! Detection and manual restore of files left under quarantine names
//!
//! A crash between the two rename phases leaves sources under
//! `__TMP__<token>__<name>`. Nothing here runs on its own; the operator calls
//! it explicitly.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::two_phase::original_name;

/// A file found under a quarantine name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedFile {
    /// Current (quarantine) path
    pub path: PathBuf,
    /// Path the file had before quarantine
    pub original_path: PathBuf,
}

/// Result of a restore sweep
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<PathBuf>,
    /// Files left in place because their original name is taken or the rename failed
    pub left: Vec<QuarantinedFile>,
}

/// List quarantined files directly inside `dir`, sorted by path
pub fn find_quarantined(dir: &Path) -> io::Result<Vec<QuarantinedFile>> {
    let mut found = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(original) = original_name(&name) {
            found.push(QuarantinedFile {
                path: entry.path(),
                original_path: dir.join(original),
            });
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// Move every quarantined file in `dir` back to its original name when free
pub fn restore_quarantined(dir: &Path) -> io::Result<RestoreReport> {
    let mut report = RestoreReport::default();

    for item in find_quarantined(dir)? {
        if item.original_path.exists() {
            warn!("Cannot restore {:?}: {:?} exists", item.path, item.original_path);
            report.left.push(item);
            continue;
        }
        match std::fs::rename(&item.path, &item.original_path) {
            Ok(()) => {
                info!("Restored {:?}", item.original_path);
                report.restored.push(item.original_path);
            }
            Err(e) => {
                warn!("Failed to restore {:?}: {}", item.path, e);
                report.left.push(item);
            }
        }
    }

    Ok(report)
}
