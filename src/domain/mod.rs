//! Domain types for buildloop
//!
//! - Run / Iteration: the attempt loop records
//! - Status / RunOutcome: progress and terminal states
//! - CollaboratorInvocation / ToolCallRecord: agents and their tool calls
//! - TestRunResult / ServerOutput: what one build-and-test pass produced

pub mod invocation;
pub mod run;
pub mod test_result;

pub use invocation::{CollaboratorInvocation, ToolCallRecord};
pub use run::{Iteration, Run, RunOutcome, Status};
pub use test_result::{ServerOutput, TestRunResult};
