//! IPC Server - Unix socket server that starts runs and streams their status
//!
//! Provides:
//! - Unix stream socket listener with a client cap
//! - `run.start`: create a run and its project directory
//! - `run.subscribe`: execute the run, streaming events on the same connection
//!   until the terminal event, then close it
//!
//! Pending runs live in the server instance; each run accepts one observer.
//! A run leaves the table when its stream ends, or when nobody subscribes
//! within the pending-run TTL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use crate::config::{Config, ServerConfig};
use crate::domain::Run;
use crate::error::{BuildloopError, Result};
use crate::ipc::messages::{
    Methods, Request, Response, ResponseError, StartRunParams, StartRunResult, SubscribeParams, encode_line,
};
use crate::runner::Orchestrator;
use crate::status::JsonLinesSink;
use crate::supervisor::Supervisor;
use crate::workspace::Workspace;

/// Configuration for the IPC server
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Maximum number of concurrent clients
    pub max_clients: usize,
    /// How long a started run waits for its observer
    pub pending_run_ttl: Duration,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl IpcServerConfig {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            max_clients: config.max_clients,
            pending_run_ttl: config.pending_run_ttl(),
        }
    }

    /// Create config with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }

    /// Set max clients
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    pub fn with_pending_run_ttl(mut self, ttl: Duration) -> Self {
        self.pending_run_ttl = ttl;
        self
    }
}

/// Where runs created by `run.start` live and how long they may iterate
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub projects_dir: PathBuf,
    pub max_iterations: u32,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            projects_dir: config.run_loop.projects_dir.clone(),
            max_iterations: config.run_loop.max_iterations,
        }
    }
}

enum RunSlot {
    /// Created, waiting for its observer
    Pending { run: Run, created: Instant },
    /// An observer subscribed; the run is executing or done
    Claimed,
}

/// IPC Server for starting and observing runs
pub struct IpcServer<S: Supervisor> {
    config: IpcServerConfig,
    settings: RunSettings,
    orchestrator: Arc<Orchestrator<S>>,
    runs: Mutex<HashMap<String, RunSlot>>,
    clients: AtomicUsize,
    /// Shared with every run; set on shutdown
    cancel: Arc<AtomicBool>,
    shutdown: Notify,
}

impl<S: Supervisor + 'static> IpcServer<S> {
    pub fn new(config: IpcServerConfig, settings: RunSettings, orchestrator: Arc<Orchestrator<S>>) -> Self {
        Self {
            config,
            settings,
            orchestrator,
            runs: Mutex::new(HashMap::new()),
            clients: AtomicUsize::new(0),
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown: Notify::new(),
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Get count of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Runs created but not yet subscribed to
    pub fn pending_runs(&self) -> usize {
        self.lock_runs()
            .values()
            .filter(|slot| matches!(slot, RunSlot::Pending { .. }))
            .count()
    }

    /// Runs pending or streaming
    pub fn tracked_runs(&self) -> usize {
        self.lock_runs().len()
    }

    /// Signal the accept loop to stop; running runs are cancelled at their next iteration boundary
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Bind the socket and serve until `shutdown`
    pub async fn run(self: Arc<Self>) -> Result<()> {
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }
        if let Some(parent) = self.config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| BuildloopError::Ipc(format!("Failed to bind socket: {}", e)))?;
        info!("Listening on {}", self.config.socket_path.display());

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => self.clone().admit(stream),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);
        info!("Server stopped");
        Ok(())
    }

    fn admit(self: Arc<Self>, mut stream: UnixStream) {
        if self.clients.fetch_add(1, Ordering::SeqCst) >= self.config.max_clients {
            self.clients.fetch_sub(1, Ordering::SeqCst);
            warn!("Rejecting connection: {} clients connected", self.config.max_clients);
            let busy = Response::error(0, ResponseError::server_busy(self.config.max_clients));
            tokio::spawn(async move {
                if let Ok(line) = encode_line(&busy) {
                    let _ = stream.write_all(line.as_bytes()).await;
                }
            });
            return;
        }

        tokio::spawn(async move {
            if let Err(e) = self.handle_client(stream).await {
                debug!("Client connection ended with error: {}", e);
            }
            self.clients.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn handle_client(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<Request>(line) {
                Ok(request) => request,
                Err(e) => {
                    let error = ResponseError::parse_error(format!("Parse error: {}", e));
                    send(&mut writer, &Response::error(0, error)).await?;
                    continue;
                }
            };

            match request.method.as_str() {
                Methods::RUN_START => {
                    let response = self.start_run(&request);
                    send(&mut writer, &response).await?;
                }
                Methods::RUN_SUBSCRIBE => match self.claim_run(&request) {
                    Ok(run) => {
                        send(&mut writer, &Response::success(request.id, json!({"run_id": run.id}))).await?;
                        self.stream_run(run, writer).await;
                        return Ok(());
                    }
                    Err(error) => send(&mut writer, &Response::error(request.id, error)).await?,
                },
                other => {
                    send(&mut writer, &Response::error(request.id, ResponseError::method_not_found(other))).await?;
                }
            }
        }
        Ok(())
    }

    fn start_run(&self, request: &Request) -> Response {
        let params: StartRunParams = match serde_json::from_value(request.params.clone()) {
            Ok(params) => params,
            Err(e) => return Response::error(request.id, ResponseError::invalid_params(e.to_string())),
        };

        let run = Run::new(
            params.project_name,
            params.description,
            &self.settings.projects_dir,
            self.settings.max_iterations,
        );
        if let Err(e) = Workspace::create(&run.working_dir) {
            error!("Failed to create {}: {}", run.working_dir.display(), e);
            return Response::error(
                request.id,
                ResponseError::internal_error(format!("Failed to create project directory: {}", e)),
            );
        }

        let result = StartRunResult {
            run_id: run.id.clone(),
            directory: run.working_dir.display().to_string(),
        };
        let value = match serde_json::to_value(&result) {
            Ok(value) => value,
            Err(e) => return Response::error(request.id, ResponseError::internal_error(e.to_string())),
        };
        info!("Run {} created at {}", result.run_id, result.directory);

        let mut runs = self.lock_runs();
        self.expire_pending(&mut runs);
        runs.insert(
            run.id.clone(),
            RunSlot::Pending {
                run,
                created: Instant::now(),
            },
        );
        Response::success(request.id, value)
    }

    fn expire_pending(&self, runs: &mut HashMap<String, RunSlot>) {
        let ttl = self.config.pending_run_ttl;
        runs.retain(|run_id, slot| match slot {
            RunSlot::Pending { created, .. } if created.elapsed() >= ttl => {
                info!("Dropping run {}: no observer within {:?}", run_id, ttl);
                false
            }
            _ => true,
        });
    }

    fn claim_run(&self, request: &Request) -> std::result::Result<Run, ResponseError> {
        let params: SubscribeParams = serde_json::from_value(request.params.clone())
            .map_err(|e| ResponseError::invalid_params(e.to_string()))?;

        let mut runs = self.lock_runs();
        self.expire_pending(&mut runs);
        let slot = runs
            .get_mut(&params.run_id)
            .ok_or_else(|| ResponseError::run_not_found(&params.run_id))?;
        match std::mem::replace(slot, RunSlot::Claimed) {
            RunSlot::Pending { run, .. } => Ok(run),
            RunSlot::Claimed => Err(ResponseError::already_subscribed(&params.run_id)),
        }
    }

    async fn stream_run(&self, run: Run, writer: OwnedWriteHalf) {
        let run_id = run.id.clone();
        info!("Streaming run {}", run_id);
        let report = self
            .orchestrator
            .run_to_completion(run, Box::new(JsonLinesSink::new(writer)), self.cancel.clone())
            .await;
        info!(
            "Run {} ended {} after {} iteration(s)",
            run_id,
            report.outcome.label(),
            report.iterations
        );
        self.lock_runs().remove(&run_id);
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunSlot>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn send(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    writer.write_all(encode_line(response)?.as_bytes()).await?;
    Ok(())
}
