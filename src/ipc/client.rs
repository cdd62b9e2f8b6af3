//! IPC client for starting runs on a server and following their status.
//!
//! Every call opens its own connection: `start_run` is a single
//! request/response, `subscribe` turns its connection into an event stream.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{BuildloopError, Result};
use crate::ipc::messages::{ErrorCode, Methods, Request, Response, StartRunParams, StartRunResult, SubscribeParams, encode_line};
use crate::status::StatusEvent;

/// IPC client for communicating with a server.
pub struct IpcClient {
    socket_path: PathBuf,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Create a run; the server answers with its id and project directory.
    pub async fn start_run(&self, project_name: &str, description: &str) -> Result<StartRunResult> {
        let params = StartRunParams {
            project_name: project_name.to_string(),
            description: description.to_string(),
        };
        let mut connection = self.connect().await?;
        let result = connection
            .request(self.next_id(), Methods::RUN_START, serde_json::to_value(params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Start executing `run_id` and stream its events.
    pub async fn subscribe(&self, run_id: &str) -> Result<EventStream> {
        let params = SubscribeParams {
            run_id: run_id.to_string(),
        };
        let mut connection = self.connect().await?;
        connection
            .request(self.next_id(), Methods::RUN_SUBSCRIBE, serde_json::to_value(params)?)
            .await?;
        Ok(EventStream {
            lines: connection.lines,
        })
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| BuildloopError::Ipc(format!("Failed to connect to {}: {}", self.socket_path.display(), e)))?;
        let (reader, writer) = stream.into_split();
        Ok(Connection {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn request(&mut self, id: u64, method: &str, params: Value) -> Result<Value> {
        let run_id = params.get("run_id").and_then(Value::as_str).map(str::to_string);
        let request = Request::new(id, method, params);
        self.writer.write_all(encode_line(&request)?.as_bytes()).await?;

        let line = next_nonempty_line(&mut self.lines)
            .await?
            .ok_or_else(|| BuildloopError::Ipc("Connection closed before response".into()))?;
        let response: Response = serde_json::from_str(&line)?;
        if let Some(error) = response.error {
            return Err(match (error.code, run_id) {
                (ErrorCode::RUN_NOT_FOUND, Some(run_id)) => BuildloopError::RunNotFound(run_id),
                _ => BuildloopError::Ipc(format!("{} (code {})", error.message, error.code)),
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

/// Status events for one subscribed run
pub struct EventStream {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl EventStream {
    /// Next event, or `None` once the server closed the stream
    pub async fn next_event(&mut self) -> Result<Option<StatusEvent>> {
        match next_nonempty_line(&mut self.lines).await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }
}

async fn next_nonempty_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<Option<String>> {
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}
