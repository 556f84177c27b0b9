//! Typed wrapper over a spawned subprocess.
//!
//! The child itself is owned by a background wait task; everyone else sees
//! the pid, the piped streams, and an `exited` signal carrying the exit
//! code. Signals go by pid so killing never races the wait.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Exit code recorded when a process was killed or never spawned.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Probe whether a pid is alive (signal 0).
#[must_use]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

/// A live subprocess: pid, piped streams, and an exit future.
#[derive(Debug)]
pub struct SubprocessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exited: watch::Receiver<Option<i32>>,
}

impl SubprocessHandle {
    /// Spawn the command and start the wait task.
    ///
    /// # Errors
    ///
    /// Propagates the spawn failure (binary not found, permissions, …).
    pub fn spawn(command: &mut Command) -> io::Result<Self> {
        let mut child = command.spawn()?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(KILLED_EXIT_CODE),
                Err(e) => {
                    warn!(error = %e, "waiting on subprocess failed");
                    KILLED_EXIT_CODE
                },
            };
            debug!(pid = ?pid, code, "subprocess exited");
            let _ = tx.send(Some(code));
        });

        Ok(Self {
            pid,
            stdin,
            stdout,
            stderr,
            exited: rx,
        })
    }

    /// OS pid, if the process had one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the piped stdin (JSON-RPC channel for Codex subprocesses).
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Take the piped stdout.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the piped stderr.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// The exit code, when the process has already exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.exited.borrow()
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.exit_code().is_none()
    }

    /// Await process exit; the single source of truth for the exit code.
    pub async fn wait(&self) -> i32 {
        let mut rx = self.exited.clone();
        loop {
            if let Some(code) = *rx.borrow_and_update() {
                return code;
            }
            if rx.changed().await.is_err() {
                return KILLED_EXIT_CODE;
            }
        }
    }

    /// Await exit for at most `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Send a signal to the process (no-op once it has exited).
    pub fn signal(&self, signal: Signal) {
        let Some(pid) = self.pid else {
            return;
        };
        if !self.is_alive() {
            return;
        }
        let Ok(pid) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid), signal) {
            debug!(pid, signal = %signal, error = %e, "signal delivery failed");
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Returns the exit code.
    pub async fn terminate(&self, grace: Duration) -> i32 {
        self.signal(Signal::SIGTERM);
        if let Some(code) = self.wait_timeout(grace).await {
            return code;
        }
        warn!(pid = ?self.pid, "graceful shutdown expired; sending SIGKILL");
        self.signal(Signal::SIGKILL);
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn command(args: &[&str]) -> Command {
        let mut cmd = Command::new(args[0]);
        cmd.args(&args[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd
    }

    #[tokio::test]
    async fn wait_yields_the_exit_code() {
        let handle = SubprocessHandle::spawn(&mut command(&["sh", "-c", "exit 7"])).unwrap();
        assert_eq!(handle.wait().await, 7);
        assert_eq!(handle.exit_code(), Some(7));
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn wait_is_reentrant() {
        let handle = SubprocessHandle::spawn(&mut command(&["true"])).unwrap();
        assert_eq!(handle.wait().await, 0);
        // Second wait resolves immediately with the same code.
        assert_eq!(handle.wait().await, 0);
    }

    #[tokio::test]
    async fn terminate_escalates_to_sigkill() {
        // Trap TERM so only KILL works.
        let handle = SubprocessHandle::spawn(&mut command(&[
            "sh",
            "-c",
            "trap '' TERM; sleep 30",
        ]))
        .unwrap();
        // Give the shell a beat to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let code = handle.terminate(Duration::from_millis(300)).await;
        // Killed by signal: no normal exit code.
        assert_eq!(code, KILLED_EXIT_CODE);
    }

    #[tokio::test]
    async fn terminate_prefers_graceful_exit() {
        let handle = SubprocessHandle::spawn(&mut command(&["sleep", "30"])).unwrap();
        let code = handle.terminate(Duration::from_secs(5)).await;
        // sleep dies on SIGTERM without an exit code.
        assert_eq!(code, KILLED_EXIT_CODE);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn pid_alive_probes_real_processes() {
        assert!(pid_alive(std::process::id()));
        // A pid from the far end of the range is almost surely free.
        assert!(!pid_alive(u32::MAX.saturating_sub(1)));
    }

    #[tokio::test]
    async fn spawn_failure_propagates() {
        let result = SubprocessHandle::spawn(&mut command(&["/no/such/binary"]));
        assert!(result.is_err());
    }
}
