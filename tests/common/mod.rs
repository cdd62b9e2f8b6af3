//! Scripted collaborators and a recording supervisor shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use buildloop::collaborator::{
    CodeGenerator, CodeRequest, CodeResponse, Collaborators, FeedbackAnalyzer, FeedbackRequest, FeedbackResponse,
    TestGenerator, TestRequest, TestResponse,
};
use buildloop::domain::ServerOutput;
use buildloop::error::Result;
use buildloop::runner::{Orchestrator, OrchestratorConfig};
use buildloop::status::{EventKind, StatusEvent};
use buildloop::supervisor::{CommandOutcome, CommandSpec, InstallOutcome, ProcessHandle, Supervisor};
use buildloop::tools::{ToolBox, ToolRegistry};
use buildloop::validation::{TestRunner, TestRunnerConfig};
use serde_json::json;

/// Plays every collaborator role; writes one page and the test suite
#[derive(Default)]
pub struct ScriptedCollaborators {
    pub skip_tests: bool,
    pub code_calls: AtomicU32,
    pub feedback_calls: AtomicU32,
    pub feedback_after_iteration: Mutex<Vec<u32>>,
}

#[async_trait]
impl CodeGenerator for ScriptedCollaborators {
    async fn generate_code(&self, _request: &CodeRequest, tools: &ToolBox) -> Result<CodeResponse> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        tools
            .call("write_page", &json!({"url": "/index.js", "content": "export default () => 'hi'"}))
            .await?;
        tools.call("list_pages", &json!({})).await?;
        Ok(CodeResponse {
            summary: "Wrote the index page".into(),
        })
    }
}

#[async_trait]
impl TestGenerator for ScriptedCollaborators {
    async fn generate_tests(&self, _request: &TestRequest, tools: &ToolBox) -> Result<TestResponse> {
        if !self.skip_tests {
            tools
                .call("write_tests", &json!({"content": "describe('home', () => { it('loads', () => {}) })"}))
                .await?;
        }
        Ok(TestResponse::default())
    }
}

#[async_trait]
impl FeedbackAnalyzer for ScriptedCollaborators {
    async fn analyze(&self, _request: &FeedbackRequest, _tools: &ToolBox) -> Result<FeedbackResponse> {
        let n = self.feedback_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let iteration = self.code_calls.load(Ordering::SeqCst);
        self.feedback_after_iteration.lock().unwrap().push(iteration);
        Ok(FeedbackResponse {
            feedback: format!("feedback {}", n),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Pass,
    Fail,
    TimeOut,
}

/// Records every supervision call; the test step follows a script
pub struct RecordingSupervisor {
    script: Vec<Step>,
    runs: AtomicU32,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingSupervisor {
    /// Steps beyond the script repeat its last entry
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            runs: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Supervisor for RecordingSupervisor {
    type Process = u32;

    async fn install_dependencies(&self, _dir: &Path) -> InstallOutcome {
        self.record("install");
        InstallOutcome {
            success: true,
            output: "up to date".into(),
            errors: vec![],
        }
    }

    async fn start_process(&self, _dir: &Path) -> ProcessHandle<u32> {
        self.record("start");
        ProcessHandle::Live(4242)
    }

    async fn stop_process(&self, _process: u32) -> ServerOutput {
        self.record("stop");
        ServerOutput {
            stdout: "ready - started server on 0.0.0.0:3000".into(),
            stderr: String::new(),
        }
    }

    async fn run_bounded_command(&self, _spec: &CommandSpec, _dir: &Path, _timeout: Duration) -> CommandOutcome {
        self.record("test");
        let run = self.runs.fetch_add(1, Ordering::SeqCst) as usize;
        let step = self
            .script
            .get(run)
            .or(self.script.last())
            .copied()
            .unwrap_or(Step::Fail);
        match step {
            Step::Pass => CommandOutcome {
                success: true,
                exit_code: Some(0),
                stdout: "1 passing".into(),
                stderr: String::new(),
                timed_out: false,
            },
            Step::Fail => CommandOutcome {
                success: false,
                exit_code: Some(1),
                stdout: "0 passing, 1 failing".into(),
                stderr: "AssertionError: expected 'hi' to contain 'todos'".into(),
                timed_out: false,
            },
            Step::TimeOut => CommandOutcome {
                success: false,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
            },
        }
    }
}

pub fn orchestrator(
    collaborators: &Arc<ScriptedCollaborators>,
    supervisor: &Arc<RecordingSupervisor>,
    config: OrchestratorConfig,
) -> Orchestrator<RecordingSupervisor> {
    Orchestrator::new(
        Collaborators {
            code: collaborators.clone(),
            tests: collaborators.clone(),
            feedback: collaborators.clone(),
            schema: None,
        },
        TestRunner::new(supervisor.clone(), TestRunnerConfig::default()),
        Arc::new(ToolRegistry::with_builtin_tools()),
        config,
    )
}

/// (number, status, progress) of every iteration_update
pub fn iteration_updates(events: &[StatusEvent]) -> Vec<(u32, String, u8)> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::IterationUpdate {
                iteration_number,
                status,
                progress,
                ..
            } => Some((*iteration_number, status.to_string(), *progress)),
            _ => None,
        })
        .collect()
}

pub fn completed_iterations(events: &[StatusEvent]) -> usize {
    iteration_updates(events)
        .iter()
        .filter(|(_, status, _)| status == "completed")
        .count()
}
