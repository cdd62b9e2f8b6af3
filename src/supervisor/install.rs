//! Dependency installation followed by the post-install reset command.

use std::path::Path;
use std::time::Duration;

use log::{info, warn};

use super::command::{CommandSpec, describe_duration, run_bounded_command};

/// Combined result of install + reset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    pub output: String,
    pub errors: Vec<String>,
}

impl InstallOutcome {
    fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            errors: vec![error.into()],
        }
    }
}

/// Run `install` then `reset` (when configured); success needs both to exit zero.
pub async fn install_dependencies(
    install: &CommandSpec,
    reset: Option<&CommandSpec>,
    working_dir: &Path,
    install_timeout: Duration,
    reset_timeout: Duration,
) -> InstallOutcome {
    if !working_dir.is_dir() {
        return InstallOutcome::failed(
            "",
            format!("Invalid project path: {}", working_dir.display()),
        );
    }

    info!("Installing dependencies with `{}`", install);
    let installed = run_bounded_command(install, working_dir, install_timeout).await;
    if installed.timed_out {
        warn!("Dependency install timed out");
        return InstallOutcome::failed(
            "Package installation timed out",
            format!(
                "Dependency install timed out after {}",
                describe_duration(install_timeout)
            ),
        );
    }

    let mut output = installed.stdout;
    let mut errors = Vec::new();
    if !installed.stderr.is_empty() {
        errors.push(installed.stderr);
    }
    let mut success = installed.success;

    if let Some(reset) = reset {
        let reset_outcome = run_bounded_command(reset, working_dir, reset_timeout).await;
        output.push_str("\n\n--- Reset DB Output ---\n");
        output.push_str(&reset_outcome.stdout);
        if !reset_outcome.stderr.is_empty() {
            errors.push(reset_outcome.stderr);
        }
        success = success && reset_outcome.success;
    }

    if !success {
        warn!("Dependency install failed ({} error streams)", errors.len());
    }
    InstallOutcome {
        success,
        output,
        errors,
    }
}
