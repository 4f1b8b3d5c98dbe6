//! Process registry: the table of live processes and the only code that
//! mutates it.
//!
//! Every structural change happens under one table-wide lock, and the
//! matching lifecycle event is published before that lock is released. Two
//! consequences follow. Subscribers see events in the order transitions
//! happened, and a `terminate` can never observe an entry whose
//! `ProcessTerminated` event has already gone out.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::event_bus::EventBus;
use super::handle::ProcessHandle;
use super::spawner::{self, ExitNotice};
use crate::config::CommandConfig;
use crate::models::process::{LifecycleEvent, Pid, ProcessState, ProcessSummary};
use crate::{AppError, Result};

/// Capacity of the exit notice queue shared by all monitor tasks.
const EXIT_QUEUE: usize = 64;

/// Interval between table checks while waiting out the shutdown grace period.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

type Table = HashMap<Pid, ProcessHandle>;

/// Concurrency-safe table of active processes keyed by pid.
#[derive(Debug)]
pub struct ProcessRegistry {
    command: CommandConfig,
    bus: EventBus,
    table: Mutex<Table>,
    vacated: Notify,
    exit_tx: mpsc::Sender<ExitNotice>,
}

impl ProcessRegistry {
    /// Create a registry that launches `command` and publishes on `bus`.
    ///
    /// Also starts the exit observer task, so this must be called from
    /// within a tokio runtime.
    #[must_use]
    pub fn new(command: CommandConfig, bus: EventBus) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::channel(EXIT_QUEUE);
        let registry = Arc::new(Self {
            command,
            bus,
            table: Mutex::new(HashMap::new()),
            vacated: Notify::new(),
            exit_tx,
        });
        spawn_exit_observer(Arc::downgrade(&registry), exit_rx);
        registry
    }

    /// Bus this registry publishes lifecycle events on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Spawn a new instance of the configured command.
    ///
    /// The entry is inserted and `ProcessStarted` published before the pid
    /// is returned, so the pid is immediately visible to queries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the OS refuses to create the process. No
    /// entry is added and no event is published in that case.
    pub async fn start(&self) -> Result<Pid> {
        let table = self.table.lock().await;

        let child = spawner::spawn_command(&self.command)?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::Spawn("spawned process has no pid".into()))?;

        let mut table = self.await_vacancy(table, pid).await;

        let (control_tx, control_rx) = mpsc::channel(4);
        table.insert(pid, ProcessHandle::new(pid, control_tx));
        let delivered = self.bus.publish(LifecycleEvent::ProcessStarted { pid });
        drop(table);

        spawner::monitor_exit(pid, child, control_rx, self.exit_tx.clone());

        info!(pid, program = %self.command.program, delivered, "process started");
        Ok(pid)
    }

    /// Hold the table lock once `pid` has no entry.
    ///
    /// The OS only reuses a pid after the previous owner has been reaped, so
    /// an entry still holding a freshly spawned pid belongs to a process whose
    /// exit notice is in flight. The lock is released until that exit has
    /// been observed.
    async fn await_vacancy<'a>(
        &'a self,
        mut table: MutexGuard<'a, Table>,
        pid: Pid,
    ) -> MutexGuard<'a, Table> {
        while table.contains_key(&pid) {
            debug!(pid, "pid reused before the previous exit was observed");
            let vacated = self.vacated.notified();
            tokio::pin!(vacated);
            vacated.as_mut().enable();
            drop(table);
            vacated.await;
            table = self.table.lock().await;
        }
        table
    }

    /// Request termination of a running process.
    ///
    /// Returns once the signal has been sent; the exit itself is confirmed
    /// only by the `ProcessTerminated` event. A second request for a process
    /// already terminating succeeds without signalling again.
    ///
    /// # Errors
    ///
    /// - `AppError::UnknownProcess` if `pid` is not in the table.
    /// - `AppError::TerminationSignal` if the OS rejected the signal or the
    ///   process exited before it could be delivered.
    pub async fn terminate(&self, pid: Pid) -> Result<()> {
        let control = {
            let mut table = self.table.lock().await;
            let Some(handle) = table.get_mut(&pid) else {
                warn!(pid, "no running process with this pid");
                return Err(AppError::UnknownProcess(pid));
            };
            if !handle.mark_terminating() {
                debug!(pid, "termination already requested");
                return Ok(());
            }
            handle.control()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let outcome = if control.send(reply_tx).await.is_err() {
            Err(exited_before_signal(pid))
        } else {
            reply_rx.await.unwrap_or_else(|_| Err(exited_before_signal(pid)))
        };

        match outcome {
            Ok(()) => {
                info!(pid, "termination signal sent");
                Ok(())
            }
            Err(err) => {
                warn!(pid, %err, "termination request failed");
                if let Some(handle) = self.table.lock().await.get_mut(&pid) {
                    handle.revert_terminating();
                }
                Err(err)
            }
        }
    }

    /// Whether `pid` is currently in the active table.
    pub async fn contains(&self, pid: Pid) -> bool {
        self.table.lock().await.contains_key(&pid)
    }

    /// Current state of `pid`, or `None` if it is not active.
    pub async fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.table
            .lock()
            .await
            .get(&pid)
            .map(|handle| handle.state().clone())
    }

    /// Snapshot of the active table ordered by pid.
    pub async fn list(&self) -> Vec<ProcessSummary> {
        let mut rows: Vec<ProcessSummary> = self
            .table
            .lock()
            .await
            .values()
            .filter_map(ProcessHandle::summary)
            .collect();
        rows.sort_by_key(|row| row.pid);
        rows
    }

    /// Number of active processes.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Whether no process is active.
    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// Best-effort termination of every active process.
    ///
    /// Requests termination of all entries, then waits up to `grace` for the
    /// table to drain. Returns the number of processes still active.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let pids: Vec<Pid> = self.table.lock().await.keys().copied().collect();
        info!(count = pids.len(), "terminating remaining processes");

        for pid in pids {
            if let Err(err) = self.terminate(pid).await {
                debug!(pid, %err, "shutdown termination request failed");
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = self.len().await;
            if remaining == 0 {
                return 0;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, "processes still running after shutdown grace period");
                return remaining;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
    }

    /// Exit observation entry point. Runs once per process.
    ///
    /// Removes the entry and publishes `ProcessTerminated` under the same
    /// lock, returning the handle in its final `Exited` state.
    pub(crate) async fn observe_exit(&self, notice: ExitNotice) -> Option<ProcessHandle> {
        let ExitNotice { pid, exit } = notice;

        let mut table = self.table.lock().await;
        let Some(handle) = table.remove(&pid) else {
            error!(pid, "exit reported for a process that is not tracked");
            return None;
        };
        let delivered = self.bus.publish(LifecycleEvent::ProcessTerminated {
            pid,
            exit: exit.clone(),
        });
        drop(table);
        self.vacated.notify_waiters();

        info!(
            pid,
            code = ?exit.code,
            signal = ?exit.signal,
            delivered,
            "process terminated"
        );
        Some(handle.into_exited(exit))
    }
}

fn exited_before_signal(pid: Pid) -> AppError {
    AppError::TerminationSignal(format!("process {pid} exited before it could be signalled"))
}

/// Drain exit notices into the registry until it is dropped.
fn spawn_exit_observer(registry: Weak<ProcessRegistry>, mut exit_rx: mpsc::Receiver<ExitNotice>) {
    tokio::spawn(
        async move {
            while let Some(notice) = exit_rx.recv().await {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.observe_exit(notice).await;
            }
            debug!("exit observer stopped");
        }
        .instrument(info_span!("exit_observer")),
    );
}
