//! Bounded command execution.
//!
//! Every command runs in its own process group so the whole tree it spawns
//! can be signalled at once. Timeouts and spawn errors come back as failed
//! outcomes, never as errors.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use super::capture::{OutputBuffer, abort_readers, drain, spawn_reader};

/// How long to wait for pipes to close after the command exited
const POST_EXIT_DRAIN: Duration = Duration::from_secs(2);

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from an argv list as written in the config file
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), script.into()])
    }

    /// Command configured for supervision: piped output, no stdin, own process group
    pub(crate) fn to_command(&self, working_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of a bounded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    fn spawn_failed(spec: &CommandSpec, err: &std::io::Error) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: format!("Failed to start `{}`: {}", spec, err),
            timed_out: false,
        }
    }
}

/// Render a duration the way timeout messages quote it ("120 seconds", "0.2 seconds")
pub fn describe_duration(duration: Duration) -> String {
    format!("{} seconds", duration.as_secs_f64())
}

/// Send `signal` to a process group; a group that is already gone is not an error
pub(crate) fn signal_group(pgid: i32, signal: Signal) -> bool {
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!("Failed to send {:?} to process group {}: {}", signal, pgid, e);
            false
        }
    }
}

/// Attach capture readers to a freshly spawned child
pub(crate) fn capture_output(
    child: &mut Child,
) -> (OutputBuffer, OutputBuffer, Vec<tokio::task::JoinHandle<()>>) {
    let stdout = OutputBuffer::new();
    let stderr = OutputBuffer::new();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(out, stdout.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(err, stderr.clone()));
    }
    (stdout, stderr, readers)
}

/// Run `spec` in `working_dir`, killing its process group after `timeout`.
pub async fn run_bounded_command(
    spec: &CommandSpec,
    working_dir: &Path,
    timeout: Duration,
) -> CommandOutcome {
    debug!("Running `{}` in {} (timeout {:?})", spec, working_dir.display(), timeout);

    let mut child = match spec.to_command(working_dir).spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn `{}`: {}", spec, e);
            return CommandOutcome::spawn_failed(spec, &e);
        }
    };
    let pgid = child.id().map(|pid| pid as i32);
    let (stdout, stderr, mut readers) = capture_output(&mut child);

    let mut timed_out = false;
    let mut wait_error = None;
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            wait_error = Some(format!("Failed to wait for `{}`: {}", spec, e));
            None
        }
        Err(_) => {
            warn!("`{}` timed out after {:?}, killing", spec, timeout);
            timed_out = true;
            None
        }
    };

    // Leader is done (or abandoned); take down anything it left in its group.
    if let Some(pgid) = pgid {
        signal_group(pgid, Signal::SIGKILL);
    }
    if status.is_none() {
        let _ = tokio::time::timeout(POST_EXIT_DRAIN, child.wait()).await;
    }
    if !drain(&mut readers, POST_EXIT_DRAIN).await {
        warn!("`{}` left its output pipes open, abandoning readers", spec);
        abort_readers(&mut readers);
    }

    let mut stderr = stderr.snapshot();
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Command `{}` timed out after {}",
            spec,
            describe_duration(timeout)
        ));
    }
    if let Some(message) = wait_error {
        stderr.push_str(&message);
    }

    let exit_code = status.and_then(|s| s.code());
    debug!("`{}` finished: exit_code={:?} timed_out={}", spec, exit_code, timed_out);
    CommandOutcome {
        success: status.is_some_and(|s| s.success()),
        exit_code,
        stdout: stdout.snapshot(),
        stderr,
        timed_out,
    }
}
