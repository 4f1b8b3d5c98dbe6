//! Process lifecycle model: states, exit details, and lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OS-assigned process identifier.
pub type Pid = u32;

/// How a tracked process ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct ExitInfo {
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// Name of the terminating signal (e.g. `SIGTERM`), if any.
    pub signal: Option<String>,
}

impl ExitInfo {
    /// Build exit details from an OS exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: signal_of(status),
        }
    }

    /// Human-readable termination line broadcast to observers.
    ///
    /// Missing fields render as `null`.
    #[must_use]
    pub fn describe(&self, pid: Pid) -> String {
        let code = self
            .code
            .map_or_else(|| "null".to_owned(), |c| c.to_string());
        let signal = self.signal.as_deref().unwrap_or("null");
        format!("Process {pid} Terminated (Code: {code}, Signal: {signal})")
    }
}

#[cfg(unix)]
fn signal_of(status: std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|raw| {
        nix::sys::signal::Signal::try_from(raw)
            .map_or_else(|_| raw.to_string(), |sig| sig.as_str().to_owned())
    })
}

#[cfg(not(unix))]
fn signal_of(_status: std::process::ExitStatus) -> Option<String> {
    None
}

/// Lifecycle state of one tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is alive and has not been asked to stop.
    Running,
    /// A termination request has been delivered; exit not yet observed.
    Terminating,
    /// Exit observed. Never present in the active table.
    Exited(ExitInfo),
}

impl ProcessState {
    /// Listing status, or `None` once the process has exited.
    #[must_use]
    pub fn status(&self) -> Option<ProcessStatus> {
        match self {
            Self::Running => Some(ProcessStatus::Running),
            Self::Terminating => Some(ProcessStatus::Terminating),
            Self::Exited(_) => None,
        }
    }
}

/// Externally visible status of an active process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Process is alive.
    Running,
    /// Termination requested, waiting for exit.
    Terminating,
}

/// Snapshot row describing one active process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessSummary {
    /// Process identifier.
    pub pid: Pid,
    /// Current status.
    pub status: ProcessStatus,
    /// When the registry inserted the process.
    pub started_at: DateTime<Utc>,
}

/// A state transition of a tracked process, fanned out to every observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A process was spawned and inserted into the registry.
    ProcessStarted {
        /// Identifier of the new process.
        pid: Pid,
    },
    /// A process exited and was removed from the registry.
    ProcessTerminated {
        /// Identifier of the exited process.
        pid: Pid,
        /// Exit code and signal.
        exit: ExitInfo,
    },
}

impl LifecycleEvent {
    /// Process the event refers to.
    #[must_use]
    pub fn pid(&self) -> Pid {
        match self {
            Self::ProcessStarted { pid } | Self::ProcessTerminated { pid, .. } => *pid,
        }
    }
}
