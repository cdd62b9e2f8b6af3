//! External collaborators
//!
//! The code generator, test generator, feedback analyzer and schema generator
//! are black boxes behind async traits. Each receives a request struct and the
//! toolbox of the agent it runs as; errors propagate unchanged.

mod process;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CollaboratorsConfig;
use crate::domain::ServerOutput;
use crate::error::{BuildloopError, Result};
use crate::tools::ToolBox;

pub use process::ProcessCollaborator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRequest {
    pub project_name: String,
    pub description: String,
    /// Feedback from the previous failed iteration
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeResponse {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequest {
    pub project_name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestResponse {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub output: String,
    pub errors: Vec<String>,
    pub server_output: ServerOutput,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackResponse {
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRequest {
    pub instructions: String,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaResponse {
    pub summary: String,
}

/// Produces or updates the application's source files
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate_code(&self, request: &CodeRequest, tools: &ToolBox) -> Result<CodeResponse>;
}

/// Writes the end-to-end test suite
#[async_trait]
pub trait TestGenerator: Send + Sync {
    async fn generate_tests(&self, request: &TestRequest, tools: &ToolBox) -> Result<TestResponse>;
}

/// Turns a failed test run into short feedback for the next attempt
#[async_trait]
pub trait FeedbackAnalyzer: Send + Sync {
    async fn analyze(&self, request: &FeedbackRequest, tools: &ToolBox) -> Result<FeedbackResponse>;
}

/// Creates persistence-layer files; only reached through `generate_database`
#[async_trait]
pub trait SchemaGenerator: Send + Sync {
    async fn generate_schema(&self, request: &SchemaRequest, tools: &ToolBox) -> Result<SchemaResponse>;
}

/// The set of collaborators one orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub code: Arc<dyn CodeGenerator>,
    pub tests: Arc<dyn TestGenerator>,
    pub feedback: Arc<dyn FeedbackAnalyzer>,
    pub schema: Option<Arc<dyn SchemaGenerator>>,
}

impl Collaborators {
    /// Process-backed collaborators from config; the schema generator is optional
    pub fn from_config(config: &CollaboratorsConfig) -> Result<Self> {
        let required = |name: &str, command: &crate::config::CollaboratorCommand| {
            if command.is_configured() {
                ProcessCollaborator::from_config(name, command)
            } else {
                Err(BuildloopError::Config(format!(
                    "collaborators.{} has no command configured",
                    name
                )))
            }
        };

        let schema = if config.schema_generator.is_configured() {
            Some(Arc::new(ProcessCollaborator::from_config(
                "schema_generator",
                &config.schema_generator,
            )?) as Arc<dyn SchemaGenerator>)
        } else {
            None
        };

        Ok(Self {
            code: Arc::new(required("code_generator", &config.code_generator)?),
            tests: Arc::new(required("test_generator", &config.test_generator)?),
            feedback: Arc::new(required("feedback_analyzer", &config.feedback_analyzer)?),
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollaboratorCommand;

    #[test]
    fn test_from_config_requires_core_collaborators() {
        let config = CollaboratorsConfig::default();
        let err = Collaborators::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("code_generator"));
    }

    #[test]
    fn test_from_config_schema_optional() {
        let command = CollaboratorCommand {
            command: vec!["gen".into()],
            timeout_ms: 1_000,
        };
        let config = CollaboratorsConfig {
            code_generator: command.clone(),
            test_generator: command.clone(),
            feedback_analyzer: command,
            schema_generator: CollaboratorCommand::default(),
        };
        let collaborators = Collaborators::from_config(&config).unwrap();
        assert!(collaborators.schema.is_none());
    }

    #[test]
    fn test_response_defaults() {
        let response: CodeResponse = serde_json::from_str("{}").unwrap();
        assert!(response.summary.is_empty());
        let feedback: FeedbackResponse = serde_json::from_str(r#"{"feedback":"fix it"}"#).unwrap();
        assert_eq!(feedback.feedback, "fix it");
    }
}
