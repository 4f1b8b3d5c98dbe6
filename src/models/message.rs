//! Observer wire contract.
//!
//! Both gateways carry the same JSON messages, tagged by an `event` field:
//!
//! ```json
//! {"event": "start-process"}
//! {"event": "terminate-process", "pid": 100}
//! {"event": "start-accepted", "pid": 100}
//! {"event": "process-started", "pid": 100}
//! {"event": "process-terminated", "pid": 100, "code": 0, "signal": null,
//!  "message": "Process 100 Terminated (Code: 0, Signal: null)"}
//! ```

use serde::{Deserialize, Serialize};

use super::process::{LifecycleEvent, Pid, ProcessSummary};
use crate::AppError;

/// Inbound request from an observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientRequest {
    /// Launch a new instance of the configured command.
    StartProcess,
    /// Ask a running process to terminate.
    TerminateProcess {
        /// Target process identifier.
        pid: Pid,
    },
    /// Request a snapshot of the active process table.
    ListProcesses,
}

/// Severity attached to a [`ServerMessage::Notice`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// The request had no effect but nothing failed.
    Warning,
    /// The request failed.
    Error,
}

/// Outbound message to an observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Reply to `start-process`, sent to the requester only and ahead of
    /// the matching `process-started` broadcast.
    StartAccepted {
        /// Identifier of the process this request started.
        pid: Pid,
    },
    /// Broadcast when a process is started by any observer.
    ProcessStarted {
        /// New process identifier.
        pid: Pid,
    },
    /// Broadcast when a process exits for any reason.
    ProcessTerminated {
        /// Exited process identifier.
        pid: Pid,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Terminating signal name, if any.
        signal: Option<String>,
        /// Human-readable termination line.
        message: String,
    },
    /// Reply to `list-processes`, sent to the requester only.
    ProcessList {
        /// Active processes ordered by pid.
        processes: Vec<ProcessSummary>,
    },
    /// Non-fatal condition reported to the requester only.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Description of the condition.
        message: String,
    },
}

impl ServerMessage {
    /// Build a notice message.
    #[must_use]
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self::Notice {
            level,
            message: message.into(),
        }
    }

    /// Map a request failure to the notice relayed to the requester.
    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        let level = match err {
            AppError::UnknownProcess(_) | AppError::TerminationSignal(_) => NoticeLevel::Warning,
            _ => NoticeLevel::Error,
        };
        Self::notice(level, err.to_string())
    }
}

impl From<LifecycleEvent> for ServerMessage {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::ProcessStarted { pid } => Self::ProcessStarted { pid },
            LifecycleEvent::ProcessTerminated { pid, exit } => Self::ProcessTerminated {
                pid,
                message: exit.describe(pid),
                code: exit.code,
                signal: exit.signal,
            },
        }
    }
}
