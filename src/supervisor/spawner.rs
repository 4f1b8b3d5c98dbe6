//! Command spawner and per-process exit monitor.
//!
//! Every started process gets one monitor task that owns its
//! [`tokio::process::Child`]. The task serves termination requests from the
//! registry and, once the child exits, reaps it and sends exactly one
//! [`ExitNotice`] back to the registry's exit observer.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info_span, warn, Instrument};

use super::handle::TerminateRequest;
use crate::config::CommandConfig;
use crate::models::process::{ExitInfo, Pid};
use crate::{AppError, Result};

/// Exit report sent from a monitor task to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    /// Process that exited.
    pub pid: Pid,
    /// How it exited.
    pub exit: ExitInfo,
}

/// Spawn one instance of the configured command.
///
/// Standard streams are detached and `kill_on_drop(true)` is set so a
/// process still running when the server goes away is not leaked.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS cannot create the process.
pub fn spawn_command(config: &CommandConfig) -> Result<Child> {
    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    if let Some(ref dir) = config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn '{}': {err}", config.program))
    })
}

/// Start the monitor task for `child`.
///
/// The task answers every request arriving on `control_rx` by signalling the
/// child, and reports the exit on `exit_tx` once `child.wait()` completes.
pub(crate) fn monitor_exit(
    pid: Pid,
    mut child: Child,
    mut control_rx: mpsc::Receiver<TerminateRequest>,
    exit_tx: mpsc::Sender<ExitNotice>,
) {
    let span = info_span!("process_monitor", pid);
    tokio::spawn(
        async move {
            let exit = loop {
                tokio::select! {
                    result = child.wait() => {
                        break match result {
                            Ok(status) => ExitInfo::from_status(status),
                            Err(err) => {
                                warn!(%err, "error waiting for child process");
                                ExitInfo::default()
                            }
                        };
                    }
                    Some(reply) = control_rx.recv() => {
                        let outcome = request_termination(&mut child);
                        if reply.send(outcome).is_err() {
                            debug!("terminate caller went away before the outcome was reported");
                        }
                    }
                }
            };

            if exit_tx.send(ExitNotice { pid, exit }).await.is_err() {
                warn!("exit observer closed before the exit could be reported");
            }
        }
        .instrument(span),
    );
}

/// Ask the OS to terminate `child` with `SIGTERM`.
#[cfg(unix)]
fn request_termination(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    let Some(raw) = child.id() else {
        return Err(AppError::TerminationSignal(
            "process already exited".into(),
        ));
    };
    let pid = i32::try_from(raw)
        .map_err(|_| AppError::TerminationSignal(format!("pid {raw} out of range")))?;

    kill(NixPid::from_raw(pid), Signal::SIGTERM)
        .map_err(|errno| AppError::TerminationSignal(format!("failed to signal {raw}: {errno}")))
}

/// Ask the OS to terminate `child`.
#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> Result<()> {
    child
        .start_kill()
        .map_err(|err| AppError::TerminationSignal(format!("failed to kill process: {err}")))
}
