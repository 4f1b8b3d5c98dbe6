//! Registry entry for one spawned process.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::models::process::{ExitInfo, Pid, ProcessState, ProcessSummary};
use crate::Result;

/// Request delivered to a process's monitor task asking it to signal the
/// child; the monitor answers with the outcome of the OS call.
pub(crate) type TerminateRequest = oneshot::Sender<Result<()>>;

/// One tracked process.
///
/// The OS child handle itself is owned by the process's monitor task, which
/// releases it when the exit is observed. The handle keeps the control
/// channel to that task, so signalling always goes through the owner and can
/// never reach a reaped (and possibly reused) pid.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    state: ProcessState,
    started_at: DateTime<Utc>,
    control: mpsc::Sender<TerminateRequest>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Pid, control: mpsc::Sender<TerminateRequest>) -> Self {
        Self {
            pid,
            state: ProcessState::Running,
            started_at: Utc::now(),
            control,
        }
    }

    /// Process identifier.
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// When the process was inserted into the registry.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Move `Running` to `Terminating`. Returns `false` if termination was
    /// already requested.
    pub(crate) fn mark_terminating(&mut self) -> bool {
        if self.state == ProcessState::Running {
            self.state = ProcessState::Terminating;
            true
        } else {
            false
        }
    }

    /// Undo a termination request whose signal never reached the process.
    pub(crate) fn revert_terminating(&mut self) {
        if self.state == ProcessState::Terminating {
            self.state = ProcessState::Running;
        }
    }

    pub(crate) fn control(&self) -> mpsc::Sender<TerminateRequest> {
        self.control.clone()
    }

    /// Final transition, taken as the handle leaves the table.
    pub(crate) fn into_exited(mut self, exit: ExitInfo) -> Self {
        self.state = ProcessState::Exited(exit);
        self
    }

    /// Snapshot row for listings, `None` for an exited handle.
    #[must_use]
    pub fn summary(&self) -> Option<ProcessSummary> {
        Some(ProcessSummary {
            pid: self.pid,
            status: self.state.status()?,
            started_at: self.started_at,
        })
    }
}
