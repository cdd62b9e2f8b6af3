//! Collaborators run as external processes speaking JSON lines.
//!
//! Protocol, one JSON object per line:
//! - buildloop → collaborator, first line: `{"type":"request","collaborator":..,"tools":[..],"input":{..}}`
//! - collaborator → buildloop: `{"type":"tool_call","id":..,"name":..,"input":{..}}`
//! - buildloop → collaborator: `{"type":"tool_result","id":..,"ok":true,"output":..}`
//!   (or `"ok":false,"error":..`)
//! - collaborator → buildloop, last: `{"type":"result","output":{..}}`
//!
//! Lines on stdout that are not protocol messages are logged and ignored.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use nix::sys::signal::Signal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};

use super::{
    CodeGenerator, CodeRequest, CodeResponse, FeedbackAnalyzer, FeedbackRequest, FeedbackResponse,
    SchemaGenerator, SchemaRequest, SchemaResponse, TestGenerator, TestRequest, TestResponse,
};
use crate::config::CollaboratorCommand;
use crate::error::{BuildloopError, Result};
use crate::supervisor::{
    CommandSpec, OutputBuffer, abort_readers, describe_duration, drain, signal_group, spawn_reader,
};
use crate::tools::{ToolBox, ToolDefinition};

/// How long to wait for the process to exit after it sent its result
const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Request {
        collaborator: &'a str,
        tools: Vec<ToolDefinition>,
        input: Value,
    },
    ToolResult {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Result {
        output: Value,
    },
}

/// A collaborator backed by an executable
#[derive(Debug, Clone)]
pub struct ProcessCollaborator {
    name: String,
    command: CommandSpec,
    timeout: Duration,
}

impl ProcessCollaborator {
    pub fn new(name: impl Into<String>, command: CommandSpec, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            timeout,
        }
    }

    pub fn from_config(name: &str, config: &CollaboratorCommand) -> Result<Self> {
        let command = CommandSpec::from_argv(&config.command)
            .ok_or_else(|| BuildloopError::Config(format!("collaborators.{}.command is empty", name)))?;
        Ok(Self::new(name, command, config.timeout()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one request/response exchange, serving tool calls in between
    pub async fn exchange<Req, Resp>(&self, request: &Req, tools: &ToolBox) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let working_dir = tools.workspace().root();
        info!("Invoking collaborator {} (`{}`)", self.name, self.command);

        let mut child = self.spawn(working_dir)?;
        let pgid = child.id().map(|pid| pid as i32);
        let stderr = OutputBuffer::new();
        let mut readers = Vec::new();
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, stderr.clone()));
        }
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BuildloopError::Collaborator(format!(
                "{}: stdio was not captured",
                self.name
            )));
        };

        let input = serde_json::to_value(request)?;
        let conversation = self.converse(stdin, stdout, input, tools);
        let output = match tokio::time::timeout(self.timeout, conversation).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.kill(&mut child, pgid).await;
                return Err(self.with_stderr(e, &stderr));
            }
            Err(_) => {
                warn!("Collaborator {} timed out, killing", self.name);
                self.kill(&mut child, pgid).await;
                return Err(BuildloopError::Collaborator(format!(
                    "{} timed out after {}",
                    self.name,
                    describe_duration(self.timeout)
                )));
            }
        };

        let status = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                self.kill(&mut child, pgid).await;
                return Err(BuildloopError::Collaborator(format!(
                    "{} did not exit after sending its result",
                    self.name
                )));
            }
        };
        if !drain(&mut readers, EXIT_GRACE).await {
            abort_readers(&mut readers);
        }
        if !status.success() {
            return Err(BuildloopError::Collaborator(format!(
                "{} exited with {}: {}",
                self.name,
                status,
                stderr.snapshot().trim()
            )));
        }

        serde_json::from_value(output).map_err(|e| {
            BuildloopError::Collaborator(format!("{} returned a malformed result: {}", self.name, e))
        })
    }

    fn spawn(&self, working_dir: &Path) -> Result<Child> {
        let mut cmd = self.command.to_command(working_dir);
        cmd.stdin(Stdio::piped());
        cmd.spawn().map_err(|e| {
            BuildloopError::Collaborator(format!("Failed to start {} (`{}`): {}", self.name, self.command, e))
        })
    }

    async fn converse(
        &self,
        mut stdin: ChildStdin,
        stdout: ChildStdout,
        input: Value,
        tools: &ToolBox,
    ) -> Result<Value> {
        let request = Outbound::Request {
            collaborator: &self.name,
            tools: tools.definitions(),
            input,
        };
        send_line(&mut stdin, &request).await?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message = match serde_json::from_str::<Inbound>(trimmed) {
                Ok(message) => message,
                Err(_) => {
                    debug!("[{}] {}", self.name, trimmed);
                    continue;
                }
            };

            match message {
                Inbound::ToolCall { id, name, input } => {
                    let reply = match tools.call(&name, &input).await {
                        Ok(output) => Outbound::ToolResult {
                            id,
                            ok: true,
                            output: Some(output),
                            error: None,
                        },
                        Err(e) => Outbound::ToolResult {
                            id,
                            ok: false,
                            output: None,
                            error: Some(e.to_string()),
                        },
                    };
                    send_line(&mut stdin, &reply).await?;
                }
                Inbound::Result { output } => {
                    // Closing stdin tells the collaborator we are done.
                    drop(stdin);
                    return Ok(output);
                }
            }
        }

        Err(BuildloopError::Collaborator(format!(
            "{} closed its output without sending a result",
            self.name
        )))
    }

    async fn kill(&self, child: &mut Child, pgid: Option<i32>) {
        if let Some(pgid) = pgid {
            signal_group(pgid, Signal::SIGKILL);
        }
        let _ = child.start_kill();
        let _ = tokio::time::timeout(EXIT_GRACE, child.wait()).await;
    }

    fn with_stderr(&self, error: BuildloopError, stderr: &OutputBuffer) -> BuildloopError {
        let captured = stderr.snapshot();
        let captured = captured.trim();
        match error {
            BuildloopError::Collaborator(message) if !captured.is_empty() => {
                BuildloopError::Collaborator(format!("{}: {}", message, captured))
            }
            BuildloopError::Collaborator(message) => BuildloopError::Collaborator(message),
            other => BuildloopError::Collaborator(format!("{}: {}", self.name, other)),
        }
    }
}

async fn send_line(stdin: &mut ChildStdin, message: &Outbound<'_>) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

#[async_trait]
impl CodeGenerator for ProcessCollaborator {
    async fn generate_code(&self, request: &CodeRequest, tools: &ToolBox) -> Result<CodeResponse> {
        self.exchange(request, tools).await
    }
}

#[async_trait]
impl TestGenerator for ProcessCollaborator {
    async fn generate_tests(&self, request: &TestRequest, tools: &ToolBox) -> Result<TestResponse> {
        self.exchange(request, tools).await
    }
}

#[async_trait]
impl FeedbackAnalyzer for ProcessCollaborator {
    async fn analyze(&self, request: &FeedbackRequest, tools: &ToolBox) -> Result<FeedbackResponse> {
        self.exchange(request, tools).await
    }
}

#[async_trait]
impl SchemaGenerator for ProcessCollaborator {
    async fn generate_schema(&self, request: &SchemaRequest, tools: &ToolBox) -> Result<SchemaResponse> {
        self.exchange(request, tools).await
    }
}
