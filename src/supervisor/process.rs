//! Long-running server process lifecycle: start, health-check, stop.

use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use nix::sys::signal::Signal;
use nix::unistd::{Pid, getpgid};
use tokio::process::Child;
use tokio::task::JoinHandle;

use super::capture::{OutputBuffer, abort_readers, drain};
use super::command::{CommandSpec, capture_output, signal_group};
use crate::domain::ServerOutput;

/// A spawned server whose output is being captured
#[derive(Debug)]
pub struct ServerProcess {
    pid: u32,
    pgid: i32,
    child: Child,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
}

impl ServerProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn process_group(&self) -> i32 {
        self.pgid
    }

    /// Non-blocking liveness check
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Output captured so far, without stopping the process
    pub fn output_so_far(&self) -> ServerOutput {
        ServerOutput {
            stdout: self.stdout.snapshot(),
            stderr: self.stderr.snapshot(),
        }
    }
}

/// Why a server never became a live handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFailure {
    pub errors: Vec<String>,
}

impl StartFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
        }
    }
}

/// Either a live process that must be stopped, or the record of a failed start.
///
/// `stop` consumes the live variant, so a process is stopped at most once and a
/// failed start can never be stopped.
#[derive(Debug)]
pub enum ProcessHandle<P> {
    Live(P),
    StartFailed(StartFailure),
}

impl<P> ProcessHandle<P> {
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessHandle::Live(_))
    }
}

/// Spawn `spec` and confirm it is still running after `settle_delay`.
pub async fn start_process(
    spec: &CommandSpec,
    working_dir: &Path,
    settle_delay: Duration,
    drain_timeout: Duration,
) -> ProcessHandle<ServerProcess> {
    info!("Starting server `{}` in {}", spec, working_dir.display());

    let mut child = match spec.to_command(working_dir).spawn() {
        Ok(child) => child,
        Err(e) => {
            return ProcessHandle::StartFailed(StartFailure::new(format!(
                "Unexpected error starting server: {}",
                e
            )));
        }
    };
    let Some(pid) = child.id() else {
        return ProcessHandle::StartFailed(StartFailure::new(
            "Unexpected error starting server: process exited before it could be tracked",
        ));
    };
    let pgid = getpgid(Some(Pid::from_raw(pid as i32)))
        .map(|p| p.as_raw())
        .unwrap_or(pid as i32);
    let (stdout, stderr, mut readers) = capture_output(&mut child);

    let early_exit = tokio::select! {
        _ = tokio::time::sleep(settle_delay) => None,
        status = child.wait() => Some(status),
    };

    let exited = match early_exit {
        Some(status) => Some(status),
        None => match child.try_wait() {
            Ok(None) => None,
            other => Some(other.map(|s| s.unwrap_or_default())),
        },
    };

    match exited {
        None => {
            info!("Server running (pid {}, group {})", pid, pgid);
            ProcessHandle::Live(ServerProcess {
                pid,
                pgid,
                child,
                stdout,
                stderr,
                readers,
            })
        }
        Some(status) => {
            signal_group(pgid, Signal::SIGKILL);
            if !drain(&mut readers, drain_timeout).await {
                abort_readers(&mut readers);
            }
            let captured = stderr.snapshot();
            match status {
                Ok(status) => warn!("Server exited during settle delay: {}", status),
                Err(e) => warn!("Failed to poll server status: {}", e),
            }
            ProcessHandle::StartFailed(StartFailure::new(format!(
                "Server process exited prematurely: {}",
                captured
            )))
        }
    }
}

/// Stop a server and return everything it wrote.
///
/// Waits `drain_timeout` for a voluntary exit, then SIGTERM to the group,
/// `grace_period` to exit, then SIGKILL. Output is read from the capture
/// buffers, so it survives a forced kill.
pub async fn stop_process(
    mut process: ServerProcess,
    drain_timeout: Duration,
    grace_period: Duration,
) -> ServerOutput {
    let exited_on_its_own = !process.is_alive()
        || tokio::time::timeout(drain_timeout, process.child.wait())
            .await
            .is_ok();

    if exited_on_its_own {
        debug!("Server (pid {}) exited before being signalled", process.pid);
    } else {
        signal_group(process.pgid, Signal::SIGTERM);
        match tokio::time::timeout(grace_period, process.child.wait()).await {
            Ok(_) => debug!("Server (pid {}) exited on SIGTERM", process.pid),
            Err(_) => {
                warn!(
                    "Server (group {}) ignored SIGTERM for {:?}, sending SIGKILL",
                    process.pgid, grace_period
                );
                signal_group(process.pgid, Signal::SIGKILL);
                let _ = tokio::time::timeout(grace_period, process.child.wait()).await;
            }
        }
    }

    // Stragglers that survived SIGTERM would keep the pipes open.
    signal_group(process.pgid, Signal::SIGKILL);

    if !drain(&mut process.readers, drain_timeout).await {
        debug!("Output pipes still open after {:?}, abandoning readers", drain_timeout);
        abort_readers(&mut process.readers);
    }

    info!("Server (pid {}) stopped", process.pid);
    process.output_so_far()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SETTLE: Duration = Duration::from_millis(300);
    const DRAIN: Duration = Duration::from_millis(500);
    const GRACE: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_start_and_stop_captures_output() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::shell("echo ready; echo warming 1>&2; exec sleep 30");

        let handle = start_process(&spec, dir.path(), SETTLE, DRAIN).await;
        let ProcessHandle::Live(mut process) = handle else {
            panic!("server should be live");
        };
        assert!(process.is_alive());
        assert!(process.pid() > 0);

        let output = stop_process(process, DRAIN, GRACE).await;
        assert_eq!(output.stdout, "ready\n");
        assert_eq!(output.stderr, "warming\n");
    }

    #[tokio::test]
    async fn test_early_exit_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::shell("echo 'port 3000 in use' 1>&2; exit 1");

        let handle = start_process(&spec, dir.path(), Duration::from_secs(5), DRAIN).await;
        match handle {
            ProcessHandle::StartFailed(failure) => {
                assert_eq!(failure.errors.len(), 1);
                assert!(failure.errors[0].starts_with("Server process exited prematurely"));
                assert!(failure.errors[0].contains("port 3000 in use"));
            }
            ProcessHandle::Live(_) => panic!("server should have failed"),
        }
    }

    #[tokio::test]
    async fn test_spawn_error_is_start_failure() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::new("no-such-server-binary-xyz", Vec::<String>::new());
        let handle = start_process(&spec, dir.path(), SETTLE, DRAIN).await;
        assert!(!handle.is_live());
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill_and_keeps_output() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::shell("trap '' TERM; echo stubborn; while true; do sleep 0.1; done");

        let ProcessHandle::Live(process) = start_process(&spec, dir.path(), SETTLE, DRAIN).await
        else {
            panic!("server should be live");
        };
        let started = std::time::Instant::now();

        let output = stop_process(process, DRAIN, GRACE).await;
        assert_eq!(output.stdout, "stubborn\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stop_after_process_already_exited() {
        let dir = TempDir::new().unwrap();
        let spec = CommandSpec::shell("sleep 0.5; echo bye");

        let ProcessHandle::Live(process) = start_process(&spec, dir.path(), SETTLE, DRAIN).await
        else {
            panic!("server should be live");
        };
        tokio::time::sleep(Duration::from_millis(800)).await;

        let output = stop_process(process, DRAIN, GRACE).await;
        assert_eq!(output.stdout, "bye\n");
        assert!(output.stderr.is_empty());
    }
}
