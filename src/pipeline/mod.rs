//! Pipeline Layer
//!
//! One run: list images, detect and read each tag, plan names, write the
//! ledger and commit. Runs can execute in the foreground or on a background
//! thread with cooperative cancellation.

pub mod messages;
pub mod orchestrator;
pub mod task;

pub use messages::{RunEvent, RunOutcome, RunState, RunStats};
pub use orchestrator::{destination_subdir, ledger_path_for, BatchOrchestrator, ImageRecord};
pub use task::RunHandle;
