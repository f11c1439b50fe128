//! Owned OS process groups
//!
//! A shell pipeline is launched as the leader of a new process group so the
//! whole chain can be terminated with one signal. A monitor thread blocks on
//! the leader and logs its exit code.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Liveness of a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
}

/// A running shell pipeline, exclusively owned.
///
/// SIGTERM goes to the whole group at most once, either from `terminate`
/// or when the value is dropped.
pub struct ProcessGroup {
    label: String,
    command: String,
    pgid: Pid,
    exited: Arc<AtomicBool>,
    terminated: AtomicBool,
    exit_rx: Receiver<Option<i32>>,
}

impl ProcessGroup {
    /// Launch `command` through `sh -c` in a new process group
    pub fn spawn(
        label: &str,
        command: &str,
        envs: &[(&str, &str)],
        stdout: Stdio,
    ) -> Result<(Self, Option<ChildStdout>)> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .envs(envs.iter().copied())
            .stdin(Stdio::null())
            .stdout(stdout)
            .process_group(0);

        let mut child = cmd.spawn().map_err(Error::Spawn)?;
        let pgid = Pid::from_raw(child.id() as i32);
        let stdout = child.stdout.take();

        let exited = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = bounded::<Option<i32>>(1);

        let monitor_label = label.to_string();
        let monitor_exited = exited.clone();
        let monitor = thread::Builder::new()
            .name(format!("{}-monitor", label))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!("[{}] failed to wait for process: {}", monitor_label, e);
                        None
                    }
                };
                info!("[{}] shut down with RC={:?}", monitor_label, code);
                monitor_exited.store(true, Ordering::SeqCst);
                let _ = exit_tx.send(code);
            });

        if let Err(e) = monitor {
            // Without a monitor nobody would reap the group
            let _ = killpg(pgid, Signal::SIGTERM);
            return Err(Error::Spawn(e));
        }

        Ok((
            Self {
                label: label.to_string(),
                command: command.to_string(),
                pgid,
                exited,
                terminated: AtomicBool::new(false),
                exit_rx,
            },
            stdout,
        ))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pgid(&self) -> i32 {
        self.pgid.as_raw()
    }

    pub fn state(&self) -> ProcessState {
        if self.exited.load(Ordering::SeqCst) {
            ProcessState::Stopped
        } else {
            ProcessState::Running
        }
    }

    /// Send SIGTERM to the whole group; later calls are no-ops
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        match killpg(self.pgid, Signal::SIGTERM) {
            Ok(()) => debug!("[{}] sent SIGTERM to group {}", self.label, self.pgid),
            Err(Errno::ESRCH) => debug!("[{}] group {} already gone", self.label, self.pgid),
            Err(e) => warn!("[{}] failed to signal group {}: {}", self.label, self.pgid, e),
        }
    }

    /// Block until the group leader exits or `timeout` passes.
    /// Returns whether the process is known to have exited.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        if self.exited.load(Ordering::SeqCst) {
            return true;
        }
        match self.exit_rx.recv_timeout(timeout) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("label", &self.label)
            .field("pgid", &self.pgid)
            .field("state", &self.state())
            .finish()
    }
}
