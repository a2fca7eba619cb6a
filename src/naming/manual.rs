//! Operator-composed names for manual inspection mode
//!
//! The operator types a prefix, a middle part and an optional suffix; the
//! file is renamed in its own directory.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use super::sanitize::sanitize_and_upper;

/// Suffix appended after prefix + middle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NameSuffix {
    #[default]
    None,
    /// Rendered as `-<n>`
    Number(u32),
    /// Appended verbatim
    Custom(String),
}

/// A name composed from operator input
#[derive(Debug, Clone, Default)]
pub struct ManualName {
    pub prefix: String,
    pub middle: String,
    pub suffix: NameSuffix,
}

impl ManualName {
    /// Sanitized base name (no extension); empty when nothing usable was entered
    pub fn compose(&self) -> String {
        let suffix = match &self.suffix {
            NameSuffix::None => String::new(),
            NameSuffix::Number(n) => format!("-{}", n),
            NameSuffix::Custom(s) => s.trim().to_string(),
        };
        let raw = format!("{}{}{}", self.prefix.trim(), self.middle.trim(), suffix);
        sanitize_and_upper(&raw)
    }
}

/// Outcome of a manual rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    Renamed(PathBuf),
    /// Empty base; the file keeps its name
    Kept,
}

/// Rename `src` to `base` + its lower-cased extension inside its own directory.
///
/// If the target is taken by another file, `BASE-2`, `BASE-3`, ... are tried.
pub fn rename_in_place(src: &Path, base: &str) -> Result<ManualOutcome> {
    let base = sanitize_and_upper(base);
    if base.is_empty() {
        return Ok(ManualOutcome::Kept);
    }

    let ext = src
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let mut dst = src.with_file_name(format!("{}{}", base, ext));
    if dst.exists() && dst != src {
        let mut n = 2;
        loop {
            let candidate = src.with_file_name(format!("{}-{}{}", base, n, ext));
            if !candidate.exists() {
                dst = candidate;
                break;
            }
            n += 1;
        }
    }

    std::fs::rename(src, &dst)
        .with_context(|| format!("Failed to rename {:?} to {:?}", src, dst))?;
    info!("Renamed {:?} -> {:?}", src, dst);

    Ok(ManualOutcome::Renamed(dst))
}
