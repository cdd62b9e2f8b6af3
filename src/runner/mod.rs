//! Run orchestration - the generate → test → fix loop and its per-run context

mod orchestrator;

pub use orchestrator::{
    CODE_AGENT, FEEDBACK_AGENT, IterationState, Orchestrator, OrchestratorConfig, RunContext, RunReport, TEST_AGENT,
};
