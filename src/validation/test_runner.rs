//! End-to-end test execution against a live server.
//!
//! One pass: check the suite exists, install dependencies, start the server,
//! run the test command, stop the server, assemble a `TestRunResult`. A server
//! that was started is stopped exactly once on every path, including a timed
//! out or panicking test step.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{error, info, warn};

use crate::config::ProcessConfig;
use crate::domain::TestRunResult;
use crate::error::{BuildloopError, Result};
use crate::supervisor::{CommandOutcome, CommandSpec, ProcessHandle, Supervisor, describe_duration};
use crate::workspace::Workspace;

pub const NO_TEST_FILE: &str = "No test file found. Please generate Cypress tests first.";
pub const INSTALL_FAILED: &str = "Failed to install required packages";
pub const TEST_TIMED_OUT_OUTPUT: &str = "Test execution timed out";

/// Configuration for the test runner.
#[derive(Debug, Clone)]
pub struct TestRunnerConfig {
    /// The end-to-end test command.
    pub command: CommandSpec,

    /// Deadline for the test command.
    pub timeout: Duration,
}

impl Default for TestRunnerConfig {
    fn default() -> Self {
        Self {
            command: CommandSpec::new("npx", ["cypress", "run", "--headless"]),
            timeout: Duration::from_secs(120),
        }
    }
}

impl TestRunnerConfig {
    pub fn from_process_config(config: &ProcessConfig) -> Result<Self> {
        let command = CommandSpec::from_argv(&config.test_command)
            .ok_or_else(|| BuildloopError::Config("process.test_command is empty".into()))?;
        Ok(Self {
            command,
            timeout: config.test_timeout(),
        })
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs one build-and-test pass through a supervisor.
pub struct TestRunner<S: Supervisor> {
    supervisor: Arc<S>,
    config: TestRunnerConfig,
}

impl<S: Supervisor> TestRunner<S> {
    pub fn new(supervisor: Arc<S>, config: TestRunnerConfig) -> Self {
        Self { supervisor, config }
    }

    /// Get the command being run.
    pub fn command(&self) -> &CommandSpec {
        &self.config.command
    }

    /// Run the pass in `workspace`; never fails, failures are in the result.
    pub async fn run(&self, workspace: &Workspace) -> TestRunResult {
        if let Err(e) = tokio::fs::create_dir_all(workspace.test_dir()).await {
            warn!("Could not create {}: {}", workspace.test_dir().display(), e);
        }
        let suite_present = tokio::fs::metadata(workspace.test_file())
            .await
            .is_ok_and(|meta| meta.is_file());
        if !suite_present {
            return TestRunResult::failure("", vec![NO_TEST_FILE.to_string()]);
        }

        let dir = workspace.root();
        let installed = self.supervisor.install_dependencies(dir).await;
        if !installed.success {
            let mut errors = installed.errors;
            errors.push(INSTALL_FAILED.to_string());
            return TestRunResult::failure(installed.output, errors);
        }

        let process = match self.supervisor.start_process(dir).await {
            ProcessHandle::Live(process) => process,
            ProcessHandle::StartFailed(failure) => {
                return TestRunResult::failure("", failure.errors);
            }
        };

        info!("Running end-to-end tests with `{}`", self.config.command);
        let tests = self
            .supervisor
            .run_bounded_command(&self.config.command, dir, self.config.timeout);
        let outcome = AssertUnwindSafe(tests).catch_unwind().await;

        let server_output = self.supervisor.stop_process(process).await;

        let result = match outcome {
            Ok(outcome) => self.assemble(outcome),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Test step panicked: {}", message);
                TestRunResult::failure("", vec![format!("Unexpected error: {}", message)])
            }
        };
        result.with_server_output(server_output)
    }

    fn assemble(&self, outcome: CommandOutcome) -> TestRunResult {
        if outcome.timed_out {
            return TestRunResult::failure(
                TEST_TIMED_OUT_OUTPUT,
                vec![format!(
                    "End-to-end test execution timed out after {}",
                    describe_duration(self.config.timeout)
                )],
            );
        }

        let success = outcome.success;
        let errors = if !success && !outcome.stderr.is_empty() {
            vec![outcome.stderr]
        } else {
            Vec::new()
        };
        TestRunResult {
            success,
            output: outcome.stdout,
            errors,
            server_output: Default::default(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "test step panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServerOutput;
    use crate::supervisor::{InstallOutcome, StartFailure};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum TestStep {
        Pass,
        FailWithStderr,
        PassWithStderr,
        TimeOut,
        Panic,
    }

    struct FakeSupervisor {
        install_ok: bool,
        start_ok: bool,
        step: TestStep,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeSupervisor {
        fn new(step: TestStep) -> Self {
            Self {
                install_ok: true,
                start_ok: true,
                step,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Supervisor for FakeSupervisor {
        type Process = u32;

        async fn install_dependencies(&self, _dir: &Path) -> InstallOutcome {
            self.record("install");
            InstallOutcome {
                success: self.install_ok,
                output: "added 42 packages".into(),
                errors: if self.install_ok { vec![] } else { vec!["ERESOLVE".into()] },
            }
        }

        async fn start_process(&self, _dir: &Path) -> ProcessHandle<u32> {
            self.record("start");
            if self.start_ok {
                ProcessHandle::Live(7)
            } else {
                ProcessHandle::StartFailed(StartFailure::new("Server process exited prematurely: EADDRINUSE"))
            }
        }

        async fn stop_process(&self, _process: u32) -> ServerOutput {
            self.record("stop");
            ServerOutput {
                stdout: "ready on :3000".into(),
                stderr: "GET /api/todos 500".into(),
            }
        }

        async fn run_bounded_command(&self, _spec: &CommandSpec, _dir: &Path, _t: Duration) -> CommandOutcome {
            self.record("test");
            let outcome = |success: bool, stderr: &str, timed_out: bool| CommandOutcome {
                success,
                exit_code: if timed_out { None } else { Some(if success { 0 } else { 1 }) },
                stdout: "2 passing".into(),
                stderr: stderr.into(),
                timed_out,
            };
            match self.step {
                TestStep::Pass => outcome(true, "", false),
                TestStep::FailWithStderr => outcome(false, "AssertionError: expected 3 todos", false),
                TestStep::PassWithStderr => outcome(true, "DevTools warning", false),
                TestStep::TimeOut => outcome(false, "", true),
                TestStep::Panic => panic!("cypress binary vanished"),
            }
        }
    }

    fn workspace_with_tests() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).unwrap();
        std::fs::write(ws.test_file(), "describe('app', () => {})").unwrap();
        (dir, ws)
    }

    fn runner(supervisor: &Arc<FakeSupervisor>) -> TestRunner<FakeSupervisor> {
        TestRunner::new(supervisor.clone(), TestRunnerConfig::default())
    }

    #[tokio::test]
    async fn test_missing_test_file_skips_supervisor() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let supervisor = Arc::new(FakeSupervisor::new(TestStep::Pass));

        let result = runner(&supervisor).run(&ws).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec![NO_TEST_FILE.to_string()]);
        assert!(supervisor.calls().is_empty());
        assert!(ws.test_dir().is_dir());
    }

    #[tokio::test]
    async fn test_install_failure_stops_before_server() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor {
            install_ok: false,
            ..FakeSupervisor::new(TestStep::Pass)
        });

        let result = runner(&supervisor).run(&ws).await;
        assert!(!result.success);
        assert_eq!(result.output, "added 42 packages");
        assert_eq!(result.errors, vec!["ERESOLVE".to_string(), INSTALL_FAILED.to_string()]);
        assert_eq!(supervisor.calls(), vec!["install"]);
    }

    #[tokio::test]
    async fn test_start_failure_never_runs_tests() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor {
            start_ok: false,
            ..FakeSupervisor::new(TestStep::Pass)
        });

        let result = runner(&supervisor).run(&ws).await;
        assert!(!result.success);
        assert!(result.errors[0].starts_with("Server process exited prematurely"));
        assert_eq!(supervisor.calls(), vec!["install", "start"]);
    }

    #[tokio::test]
    async fn test_passing_run_collects_server_output() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor::new(TestStep::Pass));

        let result = runner(&supervisor).run(&ws).await;
        assert!(result.success);
        assert_eq!(result.output, "2 passing");
        assert!(result.errors.is_empty());
        assert_eq!(result.server_output.stdout, "ready on :3000");
        assert_eq!(supervisor.calls(), vec!["install", "start", "test", "stop"]);
    }

    #[tokio::test]
    async fn test_failing_run_reports_stderr() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor::new(TestStep::FailWithStderr));

        let result = runner(&supervisor).run(&ws).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["AssertionError: expected 3 todos".to_string()]);
        assert_eq!(result.server_output.stderr, "GET /api/todos 500");
    }

    #[tokio::test]
    async fn test_stderr_on_success_is_not_an_error() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor::new(TestStep::PassWithStderr));

        let result = runner(&supervisor).run(&ws).await;
        assert!(result.success);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_still_stops_server() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor::new(TestStep::TimeOut));

        let result = runner(&supervisor).run(&ws).await;
        assert!(!result.success);
        assert_eq!(result.output, TEST_TIMED_OUT_OUTPUT);
        assert_eq!(
            result.errors,
            vec!["End-to-end test execution timed out after 120 seconds".to_string()]
        );
        assert_eq!(supervisor.calls(), vec!["install", "start", "test", "stop"]);
    }

    #[tokio::test]
    async fn test_panicking_test_step_stops_server_once() {
        let (_dir, ws) = workspace_with_tests();
        let supervisor = Arc::new(FakeSupervisor::new(TestStep::Panic));

        let result = runner(&supervisor).run(&ws).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Unexpected error: cypress binary vanished".to_string()]);
        assert_eq!(result.server_output.stdout, "ready on :3000");
        let stops = supervisor.calls().iter().filter(|c| **c == "stop").count();
        assert_eq!(stops, 1);
    }
}
