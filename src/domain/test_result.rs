//! Outcome of one build-and-test pass.

use serde::{Deserialize, Serialize};

/// Output captured from the application server between start and stop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ServerOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Structured result of a Test Runner pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub success: bool,
    /// Primary output (test command stdout, or install output)
    pub output: String,
    pub errors: Vec<String>,
    pub server_output: ServerOutput,
}

impl TestRunResult {
    pub fn failure(output: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            errors,
            server_output: ServerOutput::default(),
        }
    }

    pub fn with_server_output(mut self, server_output: ServerOutput) -> Self {
        self.server_output = server_output;
        self
    }

    /// One-line summary for logs and iteration details
    pub fn summary(&self) -> String {
        if self.success {
            "end-to-end tests passed".to_string()
        } else if let Some(first) = self.errors.first() {
            let line = first.lines().next().unwrap_or_default();
            format!("end-to-end tests failed: {}", line)
        } else {
            "end-to-end tests failed".to_string()
        }
    }
}
