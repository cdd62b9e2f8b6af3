//! Process Supervision
//!
//! Spawns, health-checks and terminates the generated application's processes.
//! Supervision operations report failures as values; none of them return `Err`.

mod capture;
mod command;
mod install;
mod process;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ProcessConfig;
use crate::domain::ServerOutput;
use crate::error::{BuildloopError, Result};

pub use capture::{MAX_CAPTURE_BYTES, OutputBuffer};
pub(crate) use capture::{abort_readers, drain, spawn_reader};
pub(crate) use command::signal_group;
pub use command::{CommandOutcome, CommandSpec, describe_duration, run_bounded_command};
pub use install::{InstallOutcome, install_dependencies};
pub use process::{ProcessHandle, ServerProcess, StartFailure, start_process, stop_process};

/// Lifecycle operations the test runner needs from a supervisor
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Handle to a live server
    type Process: Send;

    /// Install packages and reset the database
    async fn install_dependencies(&self, working_dir: &Path) -> InstallOutcome;

    /// Start the server and wait for it to settle
    async fn start_process(&self, working_dir: &Path) -> ProcessHandle<Self::Process>;

    /// Stop a live server, returning everything it wrote
    async fn stop_process(&self, process: Self::Process) -> ServerOutput;

    /// Run a one-shot command under a deadline
    async fn run_bounded_command(
        &self,
        spec: &CommandSpec,
        working_dir: &Path,
        timeout: Duration,
    ) -> CommandOutcome;
}

/// Supervisor backed by real OS processes
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    install: CommandSpec,
    reset: Option<CommandSpec>,
    server: CommandSpec,
    install_timeout: Duration,
    reset_timeout: Duration,
    settle_delay: Duration,
    drain_timeout: Duration,
    grace_period: Duration,
}

impl ProcessSupervisor {
    /// Build from the `process` config section; an empty reset command disables reset
    pub fn from_config(config: &ProcessConfig) -> Result<Self> {
        let install = CommandSpec::from_argv(&config.install_command)
            .ok_or_else(|| BuildloopError::Config("process.install_command is empty".into()))?;
        let server = CommandSpec::from_argv(&config.server_command)
            .ok_or_else(|| BuildloopError::Config("process.server_command is empty".into()))?;

        Ok(Self {
            install,
            reset: CommandSpec::from_argv(&config.reset_command),
            server,
            install_timeout: config.install_timeout(),
            reset_timeout: config.reset_timeout(),
            settle_delay: config.settle_delay(),
            drain_timeout: config.drain_timeout(),
            grace_period: config.grace_period(),
        })
    }

    pub fn server_command(&self) -> &CommandSpec {
        &self.server
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    type Process = ServerProcess;

    async fn install_dependencies(&self, working_dir: &Path) -> InstallOutcome {
        install::install_dependencies(
            &self.install,
            self.reset.as_ref(),
            working_dir,
            self.install_timeout,
            self.reset_timeout,
        )
        .await
    }

    async fn start_process(&self, working_dir: &Path) -> ProcessHandle<ServerProcess> {
        process::start_process(&self.server, working_dir, self.settle_delay, self.drain_timeout).await
    }

    async fn stop_process(&self, process: ServerProcess) -> ServerOutput {
        process::stop_process(process, self.drain_timeout, self.grace_period).await
    }

    async fn run_bounded_command(
        &self,
        spec: &CommandSpec,
        working_dir: &Path,
        timeout: Duration,
    ) -> CommandOutcome {
        command::run_bounded_command(spec, working_dir, timeout).await
    }
}
