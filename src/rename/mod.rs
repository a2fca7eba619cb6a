//! Rename Layer
//!
//! Conflict-free batch renames, the mapping ledger, and the filesystem
//! helpers around them.

pub mod files;
pub mod ledger;
pub mod quarantine;
pub mod two_phase;

pub use files::{clear_crops, crops_dir_for, ensure_dir, is_image_path, iter_images, safe_clean_dir};
pub use ledger::{read_mapping, write_mapping, LedgerRow, Status, LEDGER_HEADER};
pub use quarantine::{find_quarantined, restore_quarantined, QuarantinedFile, RestoreReport};
pub use two_phase::{
    commit_plans, two_phase_rename, RenameOutcome, RenamePlan, RenameReport, QUARANTINE_MARKER,
};
