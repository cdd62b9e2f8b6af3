//! Tool registry and per-agent toolbox
//!
//! Every tool is wrapped in an instrumentation interceptor when it is
//! registered, so a call always emits `in_progress` followed by exactly one of
//! `completed` / `failed`, under a freshly generated tool-call id.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use serde_json::Value;

use super::definition::{Tool, ToolDefinition};
use super::detail::{describe_call, describe_failure, describe_success};
use crate::collaborator::SchemaGenerator;
use crate::domain::Status;
use crate::error::{BuildloopError, Result};
use crate::status::AgentScope;
use crate::workspace::Workspace;

/// Interceptor emitting tool-call events around one registered tool
struct Instrumented {
    name: String,
    tool: Arc<dyn Tool>,
}

impl Instrumented {
    async fn invoke(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let agent = tools.agent();
        let call_id = agent.next_tool_call_id();
        agent.tool_call(&call_id, &self.name, Status::InProgress, describe_call(&self.name, input));

        match self.tool.call(input, tools).await {
            Ok(output) => {
                agent.tool_call(&call_id, &self.name, Status::Completed, describe_success(&self.name));
                Ok(output)
            }
            Err(e) => {
                debug!("Tool {} failed: {}", self.name, e);
                agent.tool_call(
                    &call_id,
                    &self.name,
                    Status::Failed,
                    describe_failure(&self.name, &e.to_string()),
                );
                Err(e)
            }
        }
    }
}

/// Tools available to collaborators, keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Instrumented>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tool
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        for tool in super::builtin::all() {
            registry.register(tool);
        }
        registry
    }

    /// Register (or replace) a tool under its definition's name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name.clone(), Instrumented { name, tool });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.tool.definition()).collect()
    }

    /// Run a registered tool for the agent owning `tools`
    pub async fn dispatch(&self, name: &str, input: &Value, tools: &ToolBox) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| BuildloopError::Tool(format!("Unknown tool: {}", name)))?;
        tool.invoke(input, tools).await
    }
}

/// What one agent can use: the registry, its project, and its status scope
#[derive(Clone)]
pub struct ToolBox {
    registry: Arc<ToolRegistry>,
    workspace: Workspace,
    agent: AgentScope,
    schema_generator: Option<Arc<dyn SchemaGenerator>>,
}

impl ToolBox {
    pub fn new(registry: Arc<ToolRegistry>, workspace: Workspace, agent: AgentScope) -> Self {
        Self {
            registry,
            workspace,
            agent,
            schema_generator: None,
        }
    }

    /// Enable `generate_database`
    pub fn with_schema_generator(mut self, generator: Arc<dyn SchemaGenerator>) -> Self {
        self.schema_generator = Some(generator);
        self
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn agent(&self) -> &AgentScope {
        &self.agent
    }

    pub fn schema_generator(&self) -> Option<&Arc<dyn SchemaGenerator>> {
        self.schema_generator.as_ref()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub async fn call(&self, name: &str, input: &Value) -> Result<String> {
        self.registry.dispatch(name, input, self).await
    }

    /// Toolbox for a nested agent invoked by this one
    pub fn nested(&self, agent_name: &str) -> ToolBox {
        Self {
            registry: self.registry.clone(),
            workspace: self.workspace.clone(),
            agent: self.agent.nested(agent_name),
            schema_generator: self.schema_generator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::definition::str_arg;
    use crate::status::{EventKind, MemorySink, StatusBroadcaster};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "Echo the input").with_param("text", "Text")
        }

        async fn call(&self, input: &Value, _tools: &ToolBox) -> Result<String> {
            Ok(str_arg(input, "text")?.to_string())
        }
    }

    fn tool_events(sink: &MemorySink) -> Vec<(String, Status, String)> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::ToolCall {
                    tool_id,
                    status,
                    details,
                    ..
                } => Some((tool_id, status, details)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_registered_tool_is_instrumented() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (broadcaster, writer) = StatusBroadcaster::start("run-1", Box::new(sink.clone()));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let tools = ToolBox::new(
            Arc::new(registry),
            Workspace::new(dir.path()),
            broadcaster.agent("iter-1", "Code Generation Agent"),
        );

        assert_eq!(tools.call("echo", &json!({"text": "hi"})).await.unwrap(), "hi");
        assert!(tools.call("echo", &json!({})).await.is_err());
        broadcaster.close();
        writer.wait().await;

        let events = tool_events(&sink);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].1, Status::InProgress);
        assert_eq!(events[0].2, "Executing echo");
        assert_eq!(events[1].1, Status::Completed);
        assert_eq!(events[0].0, events[1].0);
        assert_eq!(events[3].1, Status::Failed);
        assert!(events[3].2.starts_with("Error in echo:"));
        assert_ne!(events[0].0, events[2].0);
    }

    #[tokio::test]
    async fn test_unknown_tool_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (broadcaster, writer) = StatusBroadcaster::start("run-1", Box::new(sink.clone()));
        let tools = ToolBox::new(
            Arc::new(ToolRegistry::new()),
            Workspace::new(dir.path()),
            broadcaster.agent("iter-1", "Feedback Agent"),
        );

        let err = tools.call("nope", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool: nope"));
        broadcaster.close();
        writer.wait().await;
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_builtin_registry_names() {
        let registry = ToolRegistry::with_builtin_tools();
        for name in [
            "list_pages",
            "read_page",
            "write_page",
            "write_tests",
            "read_tests",
            "list_available_files",
            "read_file_content",
            "write_file",
            "create_directory",
            "generate_database",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert_eq!(registry.definitions().len(), 10);
    }
}
