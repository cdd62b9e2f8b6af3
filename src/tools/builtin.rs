//! Built-in project tools

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;

use super::definition::{Tool, ToolDefinition, opt_str_arg, str_arg};
use super::registry::ToolBox;
use crate::collaborator::SchemaRequest;
use crate::error::{BuildloopError, Result};
use crate::workspace::{API_DIR, DB_DIR, TEST_FILE};

pub const PATH_NOT_FOUND: &str = "PATH NOT FOUND";
pub const PATH_IS_A_DIRECTORY: &str = "PATH IS A DIRECTORY";
pub const DATABASE_AGENT: &str = "Database Agent";

const PAGE_EXTENSIONS: [&str; 3] = ["js", "jsx", "tsx"];

/// Every built-in tool
pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListPages),
        Arc::new(ReadPage),
        Arc::new(WritePage),
        Arc::new(WriteTests),
        Arc::new(ReadTests),
        Arc::new(ListAvailableFiles),
        Arc::new(ReadFileContent),
        Arc::new(WriteFile),
        Arc::new(CreateDirectory),
        Arc::new(GenerateDatabase),
    ]
}

/// Files under `dir` (recursively), skipping hidden names, in sorted order
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| BuildloopError::Tool(format!("Invalid pattern {}: {}", pattern, e)))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

async fn write_with_parents(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

struct ListPages;

#[async_trait]
impl Tool for ListPages {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("list_pages", "List every page as a virtual URL such as /index.js")
    }

    async fn call(&self, _input: &Value, tools: &ToolBox) -> Result<String> {
        let pages_dir = tools.workspace().pages_dir();
        let pages: Vec<String> = walk_files(&pages_dir)?
            .into_iter()
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext))
            })
            .map(|path| format!("/{}", relative_to(&path, &pages_dir)))
            .collect();
        debug!("Found {} pages", pages.len());
        Ok(serde_json::to_string(&pages)?)
    }
}

struct ReadPage;

#[async_trait]
impl Tool for ReadPage {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_page", "Read a page by its virtual URL")
            .with_param("url", "Virtual URL, e.g. /index.js")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let path = tools.workspace().resolve_page(str_arg(input, "url")?)?;
        if !path.exists() {
            return Ok(PATH_NOT_FOUND.to_string());
        }
        if path.is_dir() {
            return Ok(PATH_IS_A_DIRECTORY.to_string());
        }
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

struct WritePage;

#[async_trait]
impl Tool for WritePage {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("write_page", "Write a page at a virtual URL, creating directories")
            .with_param("url", "Virtual URL, e.g. /todos/[id].js")
            .with_param("content", "Full file content")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let url = str_arg(input, "url")?;
        let content = str_arg(input, "content")?;
        let path = tools.workspace().resolve_page(url)?;
        write_with_parents(&path, content).await?;
        info!("Wrote page {}", url);
        Ok(format!("Page written successfully to {}", url.trim_start_matches('/')))
    }
}

struct WriteTests;

#[async_trait]
impl Tool for WriteTests {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("write_tests", "Replace the end-to-end test suite")
            .with_param("content", "Full test file content")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let content = str_arg(input, "content")?;
        write_with_parents(&tools.workspace().test_file(), content).await?;
        Ok(format!("Tests written successfully to {}", TEST_FILE))
    }
}

struct ReadTests;

#[async_trait]
impl Tool for ReadTests {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_tests", "Read the end-to-end test suite (empty when missing)")
    }

    async fn call(&self, _input: &Value, tools: &ToolBox) -> Result<String> {
        match tokio::fs::read_to_string(tools.workspace().test_file()).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

struct ListAvailableFiles;

#[async_trait]
impl Tool for ListAvailableFiles {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "list_available_files",
            "List database files (db/) and API routes (pages/api/)",
        )
    }

    async fn call(&self, _input: &Value, tools: &ToolBox) -> Result<String> {
        let root = tools.workspace().root();
        let mut files = Vec::new();
        for dir in [DB_DIR, API_DIR] {
            for path in walk_files(&root.join(dir))? {
                files.push(relative_to(&path, root));
            }
        }
        Ok(serde_json::to_string(&files)?)
    }
}

struct ReadFileContent;

#[async_trait]
impl Tool for ReadFileContent {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_file_content", "Read a file under api/ or db/")
            .with_param("file_path", "api/<route>.js or db/<file>")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let requested = str_arg(input, "file_path")?.trim_start_matches('/');
        let relative = if requested.starts_with("api/") {
            format!("pages/{}", requested)
        } else if requested.starts_with("db/") {
            requested.to_string()
        } else {
            return Err(BuildloopError::Tool(
                "Access denied: only api/ or db/ paths can be read".into(),
            ));
        };

        let path = tools.workspace().resolve(&relative)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

struct WriteFile;

#[async_trait]
impl Tool for WriteFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("write_file", "Write a file anywhere inside the project")
            .with_param("file_path", "Project-relative path")
            .with_param("content", "Full file content")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let file_path = str_arg(input, "file_path")?;
        let content = str_arg(input, "content")?;
        let path = tools.workspace().resolve(file_path)?;
        write_with_parents(&path, content).await?;
        Ok(format!("File written successfully to {}", file_path))
    }
}

struct CreateDirectory;

#[async_trait]
impl Tool for CreateDirectory {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("create_directory", "Create a directory inside the project")
            .with_param("directory_path", "Project-relative path")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let dir = str_arg(input, "directory_path")?;
        tokio::fs::create_dir_all(tools.workspace().resolve(dir)?).await?;
        Ok(format!("Directory created: {}", dir))
    }
}

/// Runs the schema generator as a nested "Database Agent"
struct GenerateDatabase;

#[async_trait]
impl Tool for GenerateDatabase {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "generate_database",
            "Generate the SQLite schema, seed data and documentation under db/",
        )
        .with_param("instructions", "What the database must support")
        .with_optional_param("feedback", "Problems found in a previous attempt")
    }

    async fn call(&self, input: &Value, tools: &ToolBox) -> Result<String> {
        let generator = tools
            .schema_generator()
            .cloned()
            .ok_or_else(|| BuildloopError::Tool("No schema generator configured".into()))?;
        let request = SchemaRequest {
            instructions: str_arg(input, "instructions")?.to_string(),
            feedback: opt_str_arg(input, "feedback").map(str::to_string),
        };

        let nested = tools.nested(DATABASE_AGENT);
        nested.agent().start("Generating database");
        match generator.generate_schema(&request, &nested).await {
            Ok(response) => {
                nested.agent().complete(response.summary.clone());
                Ok(response.summary)
            }
            Err(e) => {
                nested.agent().fail(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{SchemaGenerator, SchemaResponse};
    use crate::domain::Status;
    use crate::status::{EventKind, MemorySink, StatusBroadcaster};
    use crate::tools::ToolRegistry;
    use crate::workspace::Workspace;
    use serde_json::json;
    use tempfile::TempDir;

    fn toolbox(dir: &TempDir, sink: &MemorySink) -> (ToolBox, StatusBroadcaster, crate::status::BroadcastWriter) {
        let workspace = Workspace::create(dir.path()).unwrap();
        let (broadcaster, writer) = StatusBroadcaster::start("run-1", Box::new(sink.clone()));
        let tools = ToolBox::new(
            Arc::new(ToolRegistry::with_builtin_tools()),
            workspace,
            broadcaster.agent("iter-1", "Code Generation Agent"),
        );
        (tools, broadcaster, writer)
    }

    #[tokio::test]
    async fn test_write_then_list_and_read_pages() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (tools, _b, _w) = toolbox(&dir, &sink);

        let msg = tools
            .call("write_page", &json!({"url": "/todos/[id].js", "content": "export default 1"}))
            .await
            .unwrap();
        assert_eq!(msg, "Page written successfully to todos/[id].js");
        tools
            .call("write_page", &json!({"url": "/index.tsx", "content": "home"}))
            .await
            .unwrap();
        std::fs::write(dir.path().join("pages/styles.css"), "body{}").unwrap();

        let listed: Vec<String> =
            serde_json::from_str(&tools.call("list_pages", &json!({})).await.unwrap()).unwrap();
        assert_eq!(listed, vec!["/index.tsx".to_string(), "/todos/[id].js".to_string()]);

        let content = tools.call("read_page", &json!({"url": "/index.tsx"})).await.unwrap();
        assert_eq!(content, "home");
        let missing = tools.call("read_page", &json!({"url": "/nope.js"})).await.unwrap();
        assert_eq!(missing, PATH_NOT_FOUND);
        let directory = tools.call("read_page", &json!({"url": "/todos"})).await.unwrap();
        assert_eq!(directory, PATH_IS_A_DIRECTORY);
    }

    #[tokio::test]
    async fn test_tests_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (tools, _b, _w) = toolbox(&dir, &sink);

        assert_eq!(tools.call("read_tests", &json!({})).await.unwrap(), "");
        tools
            .call("write_tests", &json!({"content": "describe('app', () => {})"}))
            .await
            .unwrap();
        assert!(dir.path().join(TEST_FILE).is_file());
        assert_eq!(
            tools.call("read_tests", &json!({})).await.unwrap(),
            "describe('app', () => {})"
        );
    }

    #[tokio::test]
    async fn test_database_file_access_rules() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (tools, _b, _w) = toolbox(&dir, &sink);
        std::fs::write(dir.path().join("db/schema.sql"), "CREATE TABLE t;").unwrap();
        std::fs::write(dir.path().join("db/.hidden"), "x").unwrap();
        std::fs::write(dir.path().join("pages/api/todos.js"), "handler").unwrap();

        let files: Vec<String> = serde_json::from_str(
            &tools.call("list_available_files", &json!({})).await.unwrap(),
        )
        .unwrap();
        assert_eq!(files, vec!["db/schema.sql".to_string(), "pages/api/todos.js".to_string()]);

        let api = tools
            .call("read_file_content", &json!({"file_path": "/api/todos.js"}))
            .await
            .unwrap();
        assert_eq!(api, "handler");
        let denied = tools
            .call("read_file_content", &json!({"file_path": "pages/index.js"}))
            .await;
        assert!(denied.is_err());
        let escape = tools
            .call("read_file_content", &json!({"file_path": "db/../../etc/passwd"}))
            .await;
        assert!(escape.is_err());
    }

    #[tokio::test]
    async fn test_write_file_and_create_directory_stay_inside_project() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (tools, _b, _w) = toolbox(&dir, &sink);

        tools
            .call("create_directory", &json!({"directory_path": "db/migrations"}))
            .await
            .unwrap();
        assert!(dir.path().join("db/migrations").is_dir());
        tools
            .call("write_file", &json!({"file_path": "db/README.md", "content": "docs"}))
            .await
            .unwrap();
        assert!(dir.path().join("db/README.md").is_file());

        assert!(
            tools
                .call("write_file", &json!({"file_path": "/tmp/evil", "content": "x"}))
                .await
                .is_err()
        );
    }

    struct FakeSchema;

    #[async_trait]
    impl SchemaGenerator for FakeSchema {
        async fn generate_schema(&self, request: &SchemaRequest, tools: &ToolBox) -> Result<SchemaResponse> {
            tools
                .call(
                    "write_file",
                    &json!({"file_path": "db/schema.sql", "content": request.instructions}),
                )
                .await?;
            Ok(SchemaResponse {
                summary: "schema ready".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_generate_database_runs_nested_agent() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (tools, broadcaster, writer) = toolbox(&dir, &sink);
        let tools = tools.with_schema_generator(Arc::new(FakeSchema));

        let summary = tools
            .call("generate_database", &json!({"instructions": "CREATE TABLE todos;"}))
            .await
            .unwrap();
        assert_eq!(summary, "schema ready");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("db/schema.sql")).unwrap(),
            "CREATE TABLE todos;"
        );
        broadcaster.close();
        writer.wait().await;

        let parent_id = tools.agent().id().to_string();
        let events = sink.events();
        let nested: Vec<Status> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::NestedAgentUpdate {
                    parent_agent_id,
                    status,
                    ..
                } if *parent_agent_id == parent_id => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(nested, vec![Status::InProgress, Status::Completed]);

        let tool_agents: Vec<&str> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::ToolCall { tool_name, agent_id, .. } => {
                    Some(if *agent_id == parent_id { tool_name.as_str() } else { "nested" })
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            tool_agents,
            vec!["generate_database", "nested", "nested", "generate_database"]
        );
    }

    #[tokio::test]
    async fn test_generate_database_without_generator_fails() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let (tools, _b, _w) = toolbox(&dir, &sink);
        let err = tools
            .call("generate_database", &json!({"instructions": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No schema generator configured"));
    }
}
