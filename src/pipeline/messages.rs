//! Message types for communication between a run and its caller

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    /// Discovering images
    Listing,
    /// Visiting images one by one
    Processing,
    /// Writing the ledger and committing renames
    Finalizing,
    Done,
    /// Stopped visiting images early; planned renames were still committed
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Listing => "listing",
            RunState::Processing => "processing",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
            RunState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    /// Images discovered
    pub total: usize,
    /// Renames queued for commit
    pub planned: usize,
    pub renamed_ok: usize,
    pub renamed_fail: usize,
    pub elapsed: Duration,
}

/// Final result of a run
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// 0 on success, 1 when setup or the ledger failed
    pub code: i32,
    pub stats: RunStats,
    pub cancelled: bool,
    /// Ledger written by this run, if any
    pub ledger_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Events sent from a run to its caller
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Operator-facing log line
    Log(String),
    /// Fraction of images visited, in [0, 1], never decreasing
    Progress { fraction: f32, message: String },
    State(RunState),
    Finished(RunOutcome),
}
