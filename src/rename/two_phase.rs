//! Two-phase batch rename
//!
//! Phase one moves every source to a quarantine name in its own directory;
//! phase two moves each quarantined file to its destination, refusing to
//! overwrite. No file is dropped: a failed entry ends up back at its original
//! name, or stays at its quarantine name when that is not possible.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RenameError;

/// Prefix of every quarantine file name
pub const QUARANTINE_MARKER: &str = "__TMP__";

/// One planned move from source to destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePlan {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl RenamePlan {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Result of a single plan entry
#[derive(Debug)]
pub enum RenameOutcome {
    /// File now lives at its destination
    Renamed,
    /// Entry failed; the file is at `left_at`
    Failed { error: RenameError, left_at: PathBuf },
    /// Source no longer existed when the batch started
    Vanished,
}

impl RenameOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RenameOutcome::Renamed)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RenameOutcome::Failed { .. })
    }
}

/// Per-entry outcomes, index-aligned with the input plans
#[derive(Debug, Default)]
pub struct RenameReport {
    pub outcomes: Vec<RenameOutcome>,
}

impl RenameReport {
    pub fn ok_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn fail_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.ok_count(), self.fail_count())
    }
}

/// Build a fresh quarantine name for `file_name`
pub fn quarantine_name(file_name: &str) -> String {
    format!("{}{}__{}", QUARANTINE_MARKER, Uuid::new_v4().simple(), file_name)
}

/// Recover the original file name from a quarantine name
pub fn original_name(quarantined: &str) -> Option<&str> {
    let rest = quarantined.strip_prefix(QUARANTINE_MARKER)?;
    let (token, name) = rest.split_once("__")?;
    if token.len() != 32 || !token.chars().all(|c| c.is_ascii_hexdigit()) || name.is_empty() {
        return None;
    }
    Some(name)
}

/// Run both phases and return `(ok_count, fail_count)`.
///
/// Vanished sources count as neither.
pub fn two_phase_rename(plans: &[RenamePlan]) -> (usize, usize) {
    commit_plans(plans).counts()
}

/// Run both phases and return the outcome of every entry
pub fn commit_plans(plans: &[RenamePlan]) -> RenameReport {
    let mut outcomes: Vec<Option<RenameOutcome>> = plans.iter().map(|_| None).collect();

    // Phase one: quarantine every source that still exists
    let mut quarantined: Vec<(usize, PathBuf)> = Vec::with_capacity(plans.len());
    for (i, plan) in plans.iter().enumerate() {
        if !plan.source.exists() {
            debug!("Source vanished before commit: {:?}", plan.source);
            outcomes[i] = Some(RenameOutcome::Vanished);
            continue;
        }

        let file_name = plan
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = plan.source.with_file_name(quarantine_name(&file_name));

        match std::fs::rename(&plan.source, &tmp) {
            Ok(()) => quarantined.push((i, tmp)),
            Err(source) => {
                warn!("Could not quarantine {:?}: {}", plan.source, source);
                outcomes[i] = Some(RenameOutcome::Failed {
                    error: RenameError::Io {
                        from: plan.source.clone(),
                        to: tmp,
                        source,
                    },
                    left_at: plan.source.clone(),
                });
            }
        }
    }

    // Phase two: quarantine name -> destination, never overwriting
    for (i, tmp) in quarantined {
        let plan = &plans[i];

        if plan.destination.exists() {
            warn!("Destination taken, rolling back: {:?}", plan.destination);
            let left_at = rollback(&tmp, &plan.source);
            outcomes[i] = Some(RenameOutcome::Failed {
                error: RenameError::Collision(plan.destination.clone()),
                left_at,
            });
            continue;
        }

        match move_file(&tmp, &plan.destination) {
            Ok(()) => {
                debug!("Renamed {:?} -> {:?}", plan.source, plan.destination);
                outcomes[i] = Some(RenameOutcome::Renamed);
            }
            Err(source) => {
                warn!("Commit failed for {:?}: {}", plan.destination, source);
                let left_at = rollback(&tmp, &plan.source);
                outcomes[i] = Some(RenameOutcome::Failed {
                    error: RenameError::Io {
                        from: plan.source.clone(),
                        to: plan.destination.clone(),
                        source,
                    },
                    left_at,
                });
            }
        }
    }

    let report = RenameReport {
        outcomes: outcomes
            .into_iter()
            .map(|o| o.unwrap_or(RenameOutcome::Vanished))
            .collect(),
    };

    let (ok, fail) = report.counts();
    info!("Two-phase rename finished: {} ok, {} failed, {} planned", ok, fail, plans.len());
    report
}

/// Move a quarantined file back to its original path if that path is free.
///
/// Returns where the file ended up. Errors are logged, never raised.
fn rollback(quarantined: &Path, original: &Path) -> PathBuf {
    if original.exists() {
        warn!(
            "Original name {:?} is taken; leaving file at {:?}",
            original, quarantined
        );
        return quarantined.to_path_buf();
    }

    match std::fs::rename(quarantined, original) {
        Ok(()) => original.to_path_buf(),
        Err(e) => {
            warn!("Rollback of {:?} failed: {}", quarantined, e);
            quarantined.to_path_buf()
        }
    }
}

/// Rename, falling back to copy + remove when the destination is on another volume
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    let rename_err = match std::fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !from.is_file() {
        return Err(rename_err);
    }

    debug!("Rename failed ({}), trying copy for {:?}", rename_err, to);
    if let Err(e) = std::fs::copy(from, to) {
        let _ = std::fs::remove_file(to);
        return Err(e);
    }
    if let Err(e) = std::fs::remove_file(from) {
        let _ = std::fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_quarantine_name_roundtrip() {
        let q = quarantine_name("photo 1.jpg");
        assert!(q.starts_with(QUARANTINE_MARKER));
        assert_eq!(original_name(&q), Some("photo 1.jpg"));
        assert_ne!(quarantine_name("a.png"), quarantine_name("a.png"));
    }

    #[test]
    fn test_original_name_rejects_foreign_names() {
        assert_eq!(original_name("photo.jpg"), None);
        assert_eq!(original_name("__TMP__short__a.png"), None);
        assert_eq!(original_name("__TMP__0123456789abcdef0123456789abcdef__"), None);
    }

    #[test]
    fn test_simple_batch() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        write(&dir.path().join("a.png"), "a");
        write(&dir.path().join("b.png"), "b");

        let plans = vec![
            RenamePlan::new(dir.path().join("a.png"), out.join("TAG-1.png")),
            RenamePlan::new(dir.path().join("b.png"), out.join("TAG-2.png")),
        ];

        assert_eq!(two_phase_rename(&plans), (2, 0));
        assert_eq!(read(&out.join("TAG-1.png")), "a");
        assert_eq!(read(&out.join("TAG-2.png")), "b");
        assert_eq!(file_names(dir.path()), vec!["out"]);
    }

    #[test]
    fn test_swap_keeps_both_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("A.png");
        let b = dir.path().join("B.png");
        write(&a, "content-a");
        write(&b, "content-b");

        let plans = vec![RenamePlan::new(&a, &b), RenamePlan::new(&b, &a)];

        assert_eq!(two_phase_rename(&plans), (2, 0));
        assert_eq!(read(&b), "content-a");
        assert_eq!(read(&a), "content-b");
        assert_eq!(file_names(dir.path()), vec!["A.png", "B.png"]);
    }

    #[test]
    fn test_shared_destination_one_wins() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let x = dir.path().join("X.png");
        write(&a, "a");
        write(&b, "b");

        let report = commit_plans(&[RenamePlan::new(&a, &x), RenamePlan::new(&b, &x)]);

        assert_eq!(report.counts(), (1, 1));
        assert_eq!(read(&x), "a");
        // loser rolled back to its original name
        assert_eq!(read(&b), "b");
        match &report.outcomes[1] {
            RenameOutcome::Failed { error, left_at } => {
                assert!(matches!(error, RenameError::Collision(p) if p == &x));
                assert_eq!(left_at, &b);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_existing_destination_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let x = dir.path().join("X.png");
        write(&a, "a");
        write(&x, "occupied");

        assert_eq!(two_phase_rename(&[RenamePlan::new(&a, &x)]), (0, 1));
        assert_eq!(read(&x), "occupied");
        assert_eq!(read(&a), "a");
    }

    #[test]
    fn test_vanished_source_counts_as_neither() {
        let dir = TempDir::new().unwrap();
        let report = commit_plans(&[RenamePlan::new(
            dir.path().join("gone.png"),
            dir.path().join("X.png"),
        )]);

        assert_eq!(report.counts(), (0, 0));
        assert!(matches!(report.outcomes[0], RenameOutcome::Vanished));
    }

    #[test]
    fn test_failed_copy_fallback_leaves_no_partial_destination() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let blocker = dir.path().join("blocker");
        write(&a, "a");
        write(&blocker, "plain file");

        // a file as parent makes both rename and copy fail
        let report = commit_plans(&[RenamePlan::new(&a, blocker.join("X.png"))]);

        assert_eq!(report.counts(), (0, 1));
        match &report.outcomes[0] {
            RenameOutcome::Failed { error, left_at } => {
                assert!(matches!(error, RenameError::Io { .. }));
                assert_eq!(left_at, &a);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(read(&a), "a");
        assert_eq!(read(&blocker), "plain file");
        assert_eq!(file_names(dir.path()), vec!["a.png", "blocker"]);
    }

    #[test]
    fn test_unquarantinable_source_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        // fits the name limit alone but not with the quarantine prefix
        let long = dir.path().join(format!("{}.png", "x".repeat(236)));
        let b = dir.path().join("b.png");
        write(&long, "long");
        write(&b, "b");

        let report = commit_plans(&[
            RenamePlan::new(&long, dir.path().join("L.png")),
            RenamePlan::new(&b, dir.path().join("B2.png")),
        ]);

        assert_eq!(report.counts(), (1, 1));
        match &report.outcomes[0] {
            RenameOutcome::Failed { error, left_at } => {
                assert!(matches!(error, RenameError::Io { from, .. } if from == &long));
                assert_eq!(left_at, &long);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(read(&long), "long");
        assert_eq!(read(&dir.path().join("B2.png")), "b");
        assert!(!dir.path().join("L.png").exists());
    }

    #[test]
    fn test_missing_destination_dir_rolls_back() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        write(&a, "a");

        let report = commit_plans(&[RenamePlan::new(&a, dir.path().join("missing/X.png"))]);

        assert_eq!(report.counts(), (0, 1));
        assert_eq!(read(&a), "a");
        assert_eq!(file_names(dir.path()), vec!["a.png"]);
    }
}
