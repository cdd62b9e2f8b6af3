//! Tool system - the operations collaborators use to touch a project
//!
//! Every tool is wrapped at registration so each call reports `tool_call`
//! status events under the calling agent.

pub(crate) mod builtin;
pub(crate) mod definition;
mod detail;
mod registry;

pub use definition::{Tool, ToolDefinition, opt_str_arg, str_arg};
pub use registry::{ToolBox, ToolRegistry};
