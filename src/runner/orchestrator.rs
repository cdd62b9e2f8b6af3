//! Iteration orchestrator - the generate → test → fix loop.
//!
//! Each iteration:
//! 1. Code Generator with the description and the previous iteration's feedback
//! 2. Test Generator
//! 3. Test Runner (install, start server, run suite, stop server)
//! 4. On success: the run ends `Success`
//! 5. On failure: Feedback Analyzer, store feedback, next iteration; at the cap
//!    the run ends `Exhausted`
//!
//! Collaborator errors are not retried; the agent and iteration are marked
//! failed and the error propagates.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::collaborator::{CodeRequest, Collaborators, FeedbackRequest, TestRequest};
use crate::config::Config;
use crate::domain::{Iteration, Run, RunOutcome, Status, TestRunResult};
use crate::error::Result;
use crate::status::{AgentScope, EventSink, ObserverLimits, StatusBroadcaster};
use crate::supervisor::{ProcessSupervisor, Supervisor};
use crate::tools::{ToolBox, ToolRegistry};
use crate::validation::{TestRunner, TestRunnerConfig};
use crate::workspace::Workspace;

pub const CODE_AGENT: &str = "Code Generation Agent";
pub const TEST_AGENT: &str = "Test Generation Agent";
pub const FEEDBACK_AGENT: &str = "Feedback Agent";

const PROGRESS_STARTED: u8 = 0;
const PROGRESS_CODE_DONE: u8 = 40;
const PROGRESS_TESTS_WRITTEN: u8 = 60;
const PROGRESS_TESTS_RUN: u8 = 90;
const PROGRESS_DONE: u8 = 100;

/// How one iteration left the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    /// Tests passed; terminal
    Success,
    /// Tests failed and iterations remain
    Continuing,
    /// Tests failed at the cap; terminal
    Exhausted,
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Ask the feedback analyzer after the final failing iteration too
    pub feedback_on_final_iteration: bool,
    /// Time limits for the observer of each run
    pub observer: ObserverLimits,
}

/// Per-run state passed through the call chain
pub struct RunContext {
    pub run: Run,
    pub broadcaster: StatusBroadcaster,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(run: Run, broadcaster: StatusBroadcaster) -> Self {
        Self {
            run,
            broadcaster,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned cancel flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Observed at the next iteration boundary
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// What a finished run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub iterations: u32,
    pub last_result: Option<TestRunResult>,
    pub feedback: Option<String>,
}

/// Drives iterations for one run at a time.
pub struct Orchestrator<S: Supervisor> {
    collaborators: Collaborators,
    test_runner: TestRunner<S>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl<S: Supervisor> Orchestrator<S> {
    pub fn new(
        collaborators: Collaborators,
        test_runner: TestRunner<S>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            collaborators,
            test_runner,
            registry,
            config,
        }
    }

    /// Drive `run` with events going to `sink`; returns once every event is
    /// flushed or the observer is given up on.
    pub async fn run_to_completion(&self, run: Run, sink: Box<dyn EventSink>, cancel: Arc<AtomicBool>) -> RunReport {
        let (broadcaster, writer) = StatusBroadcaster::start_with_limits(run.id.clone(), sink, self.config.observer);
        let mut ctx = RunContext::new(run, broadcaster.clone()).with_cancel_flag(cancel);
        let report = self.execute(&mut ctx).await;
        broadcaster.close();
        writer.wait().await;
        report
    }

    /// Run and emit exactly one terminal event (`completion` or `error`).
    pub async fn execute(&self, ctx: &mut RunContext) -> RunReport {
        match self.run(ctx).await {
            Ok(report) => {
                ctx.broadcaster.completion(
                    report.outcome.is_success(),
                    report.outcome.label(),
                    report.iterations,
                    report.feedback.clone(),
                );
                report
            }
            Err(e) => {
                ctx.broadcaster.error(e.to_string());
                RunReport {
                    outcome: ctx
                        .run
                        .outcome
                        .clone()
                        .unwrap_or_else(|| RunOutcome::Failed(e.to_string())),
                    iterations: ctx.run.iteration,
                    last_result: None,
                    feedback: ctx.run.feedback.clone(),
                }
            }
        }
    }

    /// Run iterations until success, the cap, cancellation or a collaborator error.
    pub async fn run(&self, ctx: &mut RunContext) -> Result<RunReport> {
        let workspace = Workspace::create(&ctx.run.working_dir)?;
        let mut last_result = None;
        info!(
            "Run {} ({}) starting, up to {} iterations",
            ctx.run.id, ctx.run.project_name, ctx.run.max_iterations
        );

        loop {
            if ctx.is_cancelled() {
                warn!("Run {} cancelled after {} iterations", ctx.run.id, ctx.run.iteration);
                return Ok(self.finish(ctx, RunOutcome::Cancelled, last_result));
            }
            let Some(mut iteration) = ctx.run.begin_iteration() else {
                return Ok(self.finish(ctx, RunOutcome::Exhausted, last_result));
            };

            let (state, result) = match self.run_iteration(ctx, &workspace, &mut iteration).await {
                Ok(done) => done,
                Err(e) => {
                    iteration.status = Status::Failed;
                    ctx.broadcaster.iteration_update(&iteration, PROGRESS_DONE, e.to_string());
                    ctx.run.finish(RunOutcome::Failed(e.to_string()));
                    return Err(e);
                }
            };
            last_result = Some(result);

            match state {
                IterationState::Success => {
                    return Ok(self.finish(ctx, RunOutcome::Success, last_result));
                }
                IterationState::Exhausted => {
                    return Ok(self.finish(ctx, RunOutcome::Exhausted, last_result));
                }
                IterationState::Continuing => {}
            }
        }
    }

    async fn run_iteration(
        &self,
        ctx: &mut RunContext,
        workspace: &Workspace,
        iteration: &mut Iteration,
    ) -> Result<(IterationState, TestRunResult)> {
        let broadcaster = ctx.broadcaster.clone();
        broadcaster.iteration_update(
            iteration,
            PROGRESS_STARTED,
            format!("Starting iteration {}", iteration.number),
        );

        let code_agent = broadcaster.agent(&iteration.id, CODE_AGENT);
        code_agent.start(format!("Generating code for iteration {}", iteration.number));
        let request = CodeRequest {
            project_name: ctx.run.project_name.clone(),
            description: ctx.run.description.clone(),
            feedback: ctx.run.feedback.clone(),
        };
        let tools = self.toolbox(workspace, &code_agent);
        let code = guarded(&code_agent, self.collaborators.code.generate_code(&request, &tools).await)?;
        code_agent.complete(summary_or(&code.summary, "Code generation completed"));
        broadcaster.iteration_update(iteration, PROGRESS_CODE_DONE, "Code generated");

        let test_agent = broadcaster.agent(&iteration.id, TEST_AGENT);
        test_agent.start("Writing end-to-end tests");
        let request = TestRequest {
            project_name: ctx.run.project_name.clone(),
            description: ctx.run.description.clone(),
        };
        let tools = self.toolbox(workspace, &test_agent);
        let tests = guarded(&test_agent, self.collaborators.tests.generate_tests(&request, &tools).await)?;
        test_agent.complete(summary_or(&tests.summary, "Tests written"));
        broadcaster.iteration_update(iteration, PROGRESS_TESTS_WRITTEN, "Running end-to-end tests");

        let result = self.test_runner.run(workspace).await;
        info!("Iteration {}: {}", iteration.number, result.summary());
        broadcaster.iteration_update(iteration, PROGRESS_TESTS_RUN, result.summary());

        let state = if result.success {
            IterationState::Success
        } else if ctx.run.is_last_iteration() {
            IterationState::Exhausted
        } else {
            IterationState::Continuing
        };

        let wants_feedback = match state {
            IterationState::Success => false,
            IterationState::Continuing => true,
            IterationState::Exhausted => self.config.feedback_on_final_iteration,
        };
        if wants_feedback {
            let feedback = self
                .request_feedback(&broadcaster, workspace, iteration, &result)
                .await?;
            ctx.run.feedback = Some(feedback);
        }

        iteration.status = Status::Completed;
        let details = if result.success {
            format!("Iteration {} completed: tests passed", iteration.number)
        } else {
            format!("Iteration {} completed: tests failed", iteration.number)
        };
        broadcaster.iteration_update(iteration, PROGRESS_DONE, details);
        Ok((state, result))
    }

    async fn request_feedback(
        &self,
        broadcaster: &StatusBroadcaster,
        workspace: &Workspace,
        iteration: &Iteration,
        result: &TestRunResult,
    ) -> Result<String> {
        let agent = broadcaster.agent(&iteration.id, FEEDBACK_AGENT);
        agent.start("Analyzing test results");
        let request = FeedbackRequest {
            output: result.output.clone(),
            errors: result.errors.clone(),
            server_output: result.server_output.clone(),
        };
        let tools = self.toolbox(workspace, &agent);
        let response = guarded(&agent, self.collaborators.feedback.analyze(&request, &tools).await)?;
        agent.complete(response.feedback.clone());
        Ok(response.feedback)
    }

    fn toolbox(&self, workspace: &Workspace, agent: &AgentScope) -> ToolBox {
        let tools = ToolBox::new(self.registry.clone(), workspace.clone(), agent.clone());
        match &self.collaborators.schema {
            Some(schema) => tools.with_schema_generator(schema.clone()),
            None => tools,
        }
    }

    fn finish(&self, ctx: &mut RunContext, outcome: RunOutcome, last_result: Option<TestRunResult>) -> RunReport {
        info!("Run {} finished: {}", ctx.run.id, outcome.label());
        ctx.run.finish(outcome.clone());
        RunReport {
            outcome,
            iterations: ctx.run.iteration,
            last_result,
            feedback: ctx.run.feedback.clone(),
        }
    }
}

impl Orchestrator<ProcessSupervisor> {
    /// Process-backed collaborators and supervision, as configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let supervisor = Arc::new(ProcessSupervisor::from_config(&config.process)?);
        let test_runner = TestRunner::new(supervisor, TestRunnerConfig::from_process_config(&config.process)?);
        Ok(Self::new(
            Collaborators::from_config(&config.collaborators)?,
            test_runner,
            Arc::new(ToolRegistry::with_builtin_tools()),
            OrchestratorConfig {
                feedback_on_final_iteration: config.run_loop.feedback_on_final_iteration,
                observer: ObserverLimits {
                    send_timeout: config.run_loop.observer_send_timeout(),
                    flush_timeout: config.run_loop.observer_flush_timeout(),
                },
            },
        ))
    }
}

/// Mark the agent failed when a collaborator call errored
fn guarded<T>(agent: &AgentScope, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        agent.fail(e.to_string());
    }
    result
}

fn summary_or(summary: &str, fallback: &str) -> String {
    if summary.trim().is_empty() {
        fallback.to_string()
    } else {
        summary.to_string()
    }
}
