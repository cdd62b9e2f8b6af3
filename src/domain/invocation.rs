//! Collaborator invocations and the tool calls they make.

use serde::{Deserialize, Serialize};

use super::Status;
use crate::id::generate_agent_id;

/// One tool call, owned by exactly one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub detail: String,
}

/// A single invocation of a collaborator ("agent")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorInvocation {
    pub id: String,
    pub name: String,
    pub status: Status,
    /// Invoking agent, for nested invocations
    pub parent_id: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl CollaboratorInvocation {
    pub fn new(name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: generate_agent_id(),
            name: name.into(),
            status: Status::Pending,
            parent_id,
            tool_calls: Vec::new(),
        }
    }

    pub fn is_nested(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Insert or update a tool call, preserving first-seen order
    pub fn record_tool_call(&mut self, id: &str, name: &str, status: Status, detail: &str) {
        match self.tool_calls.iter_mut().find(|call| call.id == id) {
            Some(call) => {
                call.status = status;
                call.detail = detail.to_string();
            }
            None => self.tool_calls.push(ToolCallRecord {
                id: id.to_string(),
                name: name.to_string(),
                status,
                detail: detail.to_string(),
            }),
        }
    }
}
