//! Status event wire format.
//!
//! Serialized as one JSON object per event with a `type` tag and camelCase
//! fields, e.g.
//! `{"type":"tool_call","iterationId":"..","toolName":"write_page","status":"completed",..}`.

use serde::{Deserialize, Serialize};

use crate::domain::Status;

/// Event payload, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventKind {
    IterationUpdate {
        iteration_id: String,
        iteration_number: u32,
        status: Status,
        progress: u8,
        details: String,
    },
    AgentUpdate {
        iteration_id: String,
        agent_id: String,
        agent_name: String,
        status: Status,
        progress: u8,
        details: String,
    },
    NestedAgentUpdate {
        iteration_id: String,
        agent_id: String,
        parent_agent_id: String,
        agent_name: String,
        status: Status,
        progress: u8,
        details: String,
    },
    ToolCall {
        iteration_id: String,
        agent_id: String,
        tool_id: String,
        tool_name: String,
        status: Status,
        details: String,
    },
    Completion {
        run_id: String,
        success: bool,
        outcome: String,
        iterations: u32,
        feedback: Option<String>,
    },
    Error {
        run_id: String,
        details: String,
    },
}

impl EventKind {
    /// Human-readable one-liner derived from the fields
    pub fn message(&self) -> String {
        match self {
            EventKind::IterationUpdate {
                iteration_number,
                status,
                progress,
                ..
            } => format!("Iteration {}: {} - {}%", iteration_number, status, progress),
            EventKind::AgentUpdate {
                agent_name,
                status,
                progress,
                ..
            } => format!("Agent {}: {} - {}%", agent_name, status, progress),
            EventKind::NestedAgentUpdate {
                agent_name,
                status,
                progress,
                ..
            } => format!("Nested Agent {}: {} - {}%", agent_name, status, progress),
            EventKind::ToolCall {
                tool_name, status, ..
            } => format!("Tool {}: {}", tool_name, status),
            EventKind::Completion {
                outcome, iterations, ..
            } => format!("Run {} after {} iteration(s)", outcome, iterations),
            EventKind::Error { details, .. } => format!("Run failed: {}", details),
        }
    }

    /// Completion and error end a stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completion { .. } | EventKind::Error { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::IterationUpdate { .. } => "iteration_update",
            EventKind::AgentUpdate { .. } => "agent_update",
            EventKind::NestedAgentUpdate { .. } => "nested_agent_update",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::Completion { .. } => "completion",
            EventKind::Error { .. } => "error",
        }
    }
}

/// A timestamped event as sent to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub message: String,
    /// RFC 3339 with microseconds
    pub timestamp: String,
}

impl StatusEvent {
    pub fn new(kind: EventKind, timestamp: String) -> Self {
        Self {
            message: kind.message(),
            kind,
            timestamp,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Serialize as a single JSON line, without the trailing newline
    pub fn to_json_line(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_iteration_update_wire_format() {
        let event = StatusEvent::new(
            EventKind::IterationUpdate {
                iteration_id: "run-1-iter-001-abcd".into(),
                iteration_number: 1,
                status: Status::InProgress,
                progress: 0,
                details: "Starting iteration 1".into(),
            },
            "2026-01-01T00:00:00.000001Z".into(),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "iteration_update",
                "iterationId": "run-1-iter-001-abcd",
                "iterationNumber": 1,
                "status": "in_progress",
                "progress": 0,
                "details": "Starting iteration 1",
                "message": "Iteration 1: in_progress - 0%",
                "timestamp": "2026-01-01T00:00:00.000001Z"
            })
        );
    }

    #[test]
    fn test_nested_agent_and_tool_messages() {
        let nested = EventKind::NestedAgentUpdate {
            iteration_id: "i".into(),
            agent_id: "a2".into(),
            parent_agent_id: "a1".into(),
            agent_name: "Database Agent".into(),
            status: Status::Completed,
            progress: 100,
            details: String::new(),
        };
        assert_eq!(nested.message(), "Nested Agent Database Agent: completed - 100%");

        let tool = EventKind::ToolCall {
            iteration_id: "i".into(),
            agent_id: "a1".into(),
            tool_id: "a1-tool-1".into(),
            tool_name: "write_page".into(),
            status: Status::Completed,
            details: "Completed write_page".into(),
        };
        assert_eq!(tool.message(), "Tool write_page: completed");
        assert!(!tool.is_terminal());
    }

    #[test]
    fn test_parse_completion_line() {
        let line = r#"{"type":"completion","runId":"run-1","success":false,"outcome":"exhausted","iterations":3,"feedback":"fix the form","message":"Run exhausted after 3 iteration(s)","timestamp":"t"}"#;
        let event: StatusEvent = serde_json::from_str(line).unwrap();
        assert!(event.is_terminal());
        assert_eq!(event.kind.type_name(), "completion");
        match event.kind {
            EventKind::Completion {
                iterations,
                feedback,
                ..
            } => {
                assert_eq!(iterations, 3);
                assert_eq!(feedback.as_deref(), Some("fix the form"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
