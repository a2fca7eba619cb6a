//! Background runs
//!
//! A run executes on its own thread with its own cancellation token, so
//! several runs can proceed side by side. Events arrive over a channel.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::messages::{RunEvent, RunOutcome};
use super::orchestrator::BatchOrchestrator;

/// Handle to a run executing in a background thread
pub struct RunHandle {
    cancel: CancellationToken,
    events: Receiver<RunEvent>,
    done: Receiver<RunOutcome>,
    handle: Option<JoinHandle<()>>,
    outcome: Option<RunOutcome>,
}

impl RunHandle {
    /// Start `orchestrator` on a new thread
    pub fn spawn(orchestrator: BatchOrchestrator) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (event_tx, events) = unbounded();
        let (done_tx, done) = bounded(1);

        let orchestrator = orchestrator.with_events(event_tx);
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name("tag-rename-run".to_string())
            .spawn(move || {
                info!("Run thread starting...");
                let outcome = orchestrator.run(&token);
                let _ = done_tx.send(outcome);
                info!("Run thread exiting...");
            })
            .context("Failed to spawn run thread")?;

        Ok(Self {
            cancel,
            events,
            done,
            handle: Some(handle),
            outcome: None,
        })
    }

    /// Ask the run to stop before its next image
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Check if the run thread is still alive
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Event stream of the run
    pub fn events(&self) -> &Receiver<RunEvent> {
        &self.events
    }

    /// Wait up to `timeout` for the run to finish.
    ///
    /// Returns `None` when the run is still going; the run is left alone.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<RunOutcome> {
        if self.outcome.is_none() {
            match self.done.recv_timeout(timeout) {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => self.outcome = Some(aborted()),
            }
        }
        self.outcome.clone()
    }

    /// Block until the run finishes
    pub fn join(mut self) -> RunOutcome {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => self.done.recv().unwrap_or_else(|_| aborted()),
        };
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Run thread panicked");
            }
        }
        outcome
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.cancel();

        // Planned renames still commit after cancel; wait for them
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Outcome for a run thread that died without reporting
fn aborted() -> RunOutcome {
    RunOutcome {
        code: 1,
        error: Some("run thread ended without an outcome".to_string()),
        ..Default::default()
    }
}
