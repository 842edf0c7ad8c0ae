//! Cancellable execution handles.
//!
//! # Design
//! - `WorkInProgress` is the caller's side: progress, outcome and `cancel`.
//! - `WorkReporter` is the executing task's side. Terminal reports consume it,
//!   so a second terminal report cannot be written.
//! - The first terminal transition wins; cancellation is terminal and later
//!   reports from the executing task are discarded.
//! - Dropping a reporter without a terminal report settles the work as failed.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

use crate::error::Reason;
use crate::model::ExpectationId;

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Executing.
    Working,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

/// Terminal result of a work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Finished successfully.
    Completed {
        /// Summary of what was done.
        reason: Reason,
        /// Time from acceptance to completion.
        duration: Duration,
    },
    /// Finished with an error.
    Failed {
        /// What went wrong.
        reason: Reason,
    },
    /// Stopped by the caller.
    Cancelled,
}

impl WorkOutcome {
    /// State corresponding to this outcome.
    #[must_use]
    pub const fn state(&self) -> WorkState {
        match self {
            Self::Completed { .. } => WorkState::Completed,
            Self::Failed { .. } => WorkState::Failed,
            Self::Cancelled => WorkState::Cancelled,
        }
    }
}

struct Terminal {
    state: Mutex<WorkState>,
    outcome: watch::Sender<Option<WorkOutcome>>,
    cancel: CancellationToken,
}

impl Terminal {
    fn state(&self) -> WorkState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, outcome: WorkOutcome) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != WorkState::Working {
            debug!(
                current = ?*state,
                discarded = ?outcome.state(),
                "work already settled; report discarded"
            );
            return false;
        }
        *state = outcome.state();
        self.outcome.send_replace(Some(outcome));
        true
    }
}

/// Caller-side handle for an executing unit of work.
#[derive(Clone)]
pub struct WorkInProgress {
    id: Uuid,
    expectation_id: ExpectationId,
    progress: watch::Receiver<f64>,
    outcome: watch::Receiver<Option<WorkOutcome>>,
    terminal: Arc<Terminal>,
}

impl WorkInProgress {
    /// Create a handle and the reporter the executing task will own.
    pub fn new(expectation_id: impl Into<ExpectationId>) -> (Self, WorkReporter) {
        let (progress_tx, progress_rx) = watch::channel(0.0);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let terminal = Arc::new(Terminal {
            state: Mutex::new(WorkState::Working),
            outcome: outcome_tx,
            cancel: CancellationToken::new(),
        });
        let handle = Self {
            id: Uuid::new_v4(),
            expectation_id: expectation_id.into(),
            progress: progress_rx,
            outcome: outcome_rx,
            terminal: Arc::clone(&terminal),
        };
        let reporter = WorkReporter {
            started: Instant::now(),
            progress: progress_tx,
            terminal,
        };
        (handle, reporter)
    }

    /// Identifier of this work item.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Expectation being worked on.
    #[must_use]
    pub fn expectation_id(&self) -> &str {
        &self.expectation_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkState {
        self.terminal.state()
    }

    /// Latest reported progress in `0.0..=1.0`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }

    /// Stream of progress updates, starting with the current value.
    #[must_use]
    pub fn progress_updates(&self) -> WatchStream<f64> {
        WatchStream::new(self.progress.clone())
    }

    /// Cancel the work. Returns `false` when it had already settled.
    ///
    /// Cancellation fires the reporter's token so the executing task can stop
    /// owned subprocesses; it never produces a completion or error.
    pub fn cancel(&self) -> bool {
        let cancelled = self.terminal.settle(WorkOutcome::Cancelled);
        if cancelled {
            self.terminal.cancel.cancel();
        }
        cancelled
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(&self) -> WorkOutcome {
        let mut receiver = self.outcome.clone();
        let settled = receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| value.clone());
        settled.unwrap_or_else(|| WorkOutcome::Failed {
            reason: Reason::new(
                "Work ended unexpectedly",
                "work outcome channel closed before a terminal report",
            ),
        })
    }
}

impl std::fmt::Debug for WorkInProgress {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkInProgress")
            .field("id", &self.id)
            .field("expectation_id", &self.expectation_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Executing-task side of a work item.
pub struct WorkReporter {
    started: Instant,
    progress: watch::Sender<f64>,
    terminal: Arc<Terminal>,
}

impl WorkReporter {
    /// Report intermediate progress; ignored once the work has settled.
    pub fn report_progress(&self, fraction: f64) {
        if self.terminal.state() == WorkState::Working {
            self.progress.send_replace(fraction.clamp(0.0, 1.0));
        }
    }

    /// Whether the caller cancelled the work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.terminal.cancel.is_cancelled()
    }

    /// Future resolving when the caller cancels.
    #[must_use]
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.terminal.cancel.cancelled()
    }

    /// Token that fires on cancellation, for helpers that outlive a borrow.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.terminal.cancel.clone()
    }

    /// Time since the work was accepted.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Report success. Returns `false` when the work had already settled.
    pub fn report_complete(self, reason: Reason) -> bool {
        let duration = self.elapsed();
        self.progress.send_replace(1.0);
        self.terminal
            .settle(WorkOutcome::Completed { reason, duration })
    }

    /// Report failure. Returns `false` when the work had already settled.
    pub fn report_error(self, reason: Reason) -> bool {
        self.terminal.settle(WorkOutcome::Failed { reason })
    }
}

impl Drop for WorkReporter {
    fn drop(&mut self) {
        let _ = self.terminal.settle(WorkOutcome::Failed {
            reason: Reason::new(
                "Work ended unexpectedly",
                "work reporter dropped without a terminal report",
            ),
        });
    }
}

/// Handle for a running package container monitor.
#[derive(Debug, Clone)]
pub struct MonitorInProgress {
    monitor_id: String,
    label: String,
    stop: CancellationToken,
}

impl MonitorInProgress {
    /// Create a handle and the token the monitor task waits on.
    pub fn new(monitor_id: impl Into<String>, label: impl Into<String>) -> (Self, CancellationToken) {
        let stop = CancellationToken::new();
        (
            Self {
                monitor_id: monitor_id.into(),
                label: label.into(),
                stop: stop.clone(),
            },
            stop,
        )
    }

    /// Monitor key, e.g. `packages`.
    #[must_use]
    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Tear the monitor down.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether `stop` was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn completion_is_reported_once() {
        let (work, reporter) = WorkInProgress::new("exp-1");
        reporter.report_progress(0.25);
        assert!((work.progress() - 0.25).abs() < f64::EPSILON);

        assert!(reporter.report_complete(Reason::plain("Copy completed")));
        let outcome = work.outcome().await;
        assert!(matches!(
            outcome,
            WorkOutcome::Completed { ref reason, .. } if reason.user == "Copy completed"
        ));
        assert_eq!(work.state(), WorkState::Completed);
        assert!(!work.cancel());
        assert_eq!(work.state(), WorkState::Completed);
    }

    #[tokio::test]
    async fn cancellation_discards_later_reports() {
        let (work, reporter) = WorkInProgress::new("exp-2");
        assert!(work.cancel());
        assert!(reporter.is_cancelled());
        reporter.cancelled().await;

        reporter.report_progress(0.9);
        assert!(work.progress() < 0.9);
        assert!(!reporter.report_error(Reason::plain("late failure")));
        assert_eq!(work.outcome().await, WorkOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropped_reporter_settles_as_failed() {
        let (work, reporter) = WorkInProgress::new("exp-3");
        let task = tokio::spawn(async move {
            let _reporter = reporter;
        });
        let _ = task.await;
        assert!(matches!(work.outcome().await, WorkOutcome::Failed { .. }));
        assert_eq!(work.state(), WorkState::Failed);
    }

    #[tokio::test]
    async fn progress_updates_are_clamped_and_streamed() {
        let (work, reporter) = WorkInProgress::new("exp-4");
        let mut updates = work.progress_updates();
        assert_eq!(updates.next().await, Some(0.0));
        reporter.report_progress(4.0);
        assert_eq!(updates.next().await, Some(1.0));
        drop(reporter);
    }

    #[test]
    fn monitor_stop_fires_token() {
        let (monitor, token) = MonitorInProgress::new("packages", "Watch playout");
        assert_eq!(monitor.monitor_id(), "packages");
        assert!(!token.is_cancelled());
        monitor.stop();
        assert!(token.is_cancelled());
        assert!(monitor.is_stopped());
    }
}
