//! Tool definitions advertised to collaborators

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::ToolBox;
use crate::error::{BuildloopError, Result};

/// Name, description and input schema of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Definition with an empty-object schema
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    /// Add a required string parameter
    pub fn with_param(mut self, name: &str, description: &str) -> Self {
        self.push_param(name, description, true);
        self
    }

    /// Add an optional string parameter
    pub fn with_optional_param(mut self, name: &str, description: &str) -> Self {
        self.push_param(name, description, false);
        self
    }

    fn push_param(&mut self, name: &str, description: &str, required: bool) {
        if let Some(props) = self.input_schema["properties"].as_object_mut() {
            props.insert(
                name.to_string(),
                serde_json::json!({ "type": "string", "description": description }),
            );
        }
        if required && let Some(list) = self.input_schema["required"].as_array_mut() {
            list.push(Value::String(name.to_string()));
        }
    }
}

/// An action a collaborator can take against the project
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool; `tools` is the calling agent's toolbox
    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String>;
}

/// Required string argument
pub fn str_arg<'a>(input: &'a Value, name: &str) -> Result<&'a str> {
    input[name]
        .as_str()
        .ok_or_else(|| BuildloopError::Tool(format!("Missing '{}' parameter", name)))
}

/// Optional string argument; empty strings count as absent
pub fn opt_str_arg<'a>(input: &'a Value, name: &str) -> Option<&'a str> {
    input[name].as_str().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_schema() {
        let def = ToolDefinition::new("write_page", "Write a page")
            .with_param("url", "Virtual URL")
            .with_optional_param("note", "Ignored");

        assert_eq!(def.input_schema["properties"]["url"]["type"], "string");
        assert_eq!(def.input_schema["required"], json!(["url"]));
        assert!(def.input_schema["properties"]["note"].is_object());
    }

    #[test]
    fn test_args() {
        let input = json!({"url": "/index.js", "feedback": ""});
        assert_eq!(str_arg(&input, "url").unwrap(), "/index.js");
        assert!(str_arg(&input, "content").is_err());
        assert_eq!(opt_str_arg(&input, "feedback"), None);
    }
}
