//! Per-run status broadcaster.
//!
//! Emission pushes onto an unbounded channel and returns immediately; a single
//! writer task drains the channel onto the run's sink in emission order. If the
//! sink fails, or a single delivery outlasts the send timeout, the observer is
//! marked disconnected and later events are discarded. Nothing here ever fails
//! or stalls the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::events::{EventKind, StatusEvent};
use super::sink::EventSink;
use crate::domain::{CollaboratorInvocation, Iteration, Status};
use crate::id::generate_tool_call_id;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Time limits applied to the observer behind a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverLimits {
    /// Longest a single event delivery may take
    pub send_timeout: Duration,
    /// Longest `BroadcastWriter::wait` waits for the queue to drain
    pub flush_timeout: Duration,
}

impl Default for ObserverLimits {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

enum Message {
    Event(StatusEvent),
    Close,
}

struct Shared {
    run_id: String,
    tx: mpsc::UnboundedSender<Message>,
    /// Last issued timestamp; guards both ordering and monotonicity
    clock: Mutex<DateTime<Utc>>,
    connected: Arc<AtomicBool>,
}

/// Cheap-to-clone handle for emitting a run's events
#[derive(Clone)]
pub struct StatusBroadcaster {
    shared: Arc<Shared>,
}

/// The writer task; await it after `close` to flush everything emitted
pub struct BroadcastWriter {
    handle: JoinHandle<()>,
    flush_timeout: Duration,
    connected: Arc<AtomicBool>,
}

impl BroadcastWriter {
    /// Wait for the writer to drain; past the flush timeout the remaining
    /// events are abandoned and the observer counts as disconnected.
    pub async fn wait(mut self) {
        match timeout(self.flush_timeout, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Status writer task failed: {}", e),
            Err(_) => {
                warn!(
                    "Observer did not drain within {:?}, abandoning remaining events",
                    self.flush_timeout
                );
                self.connected.store(false, Ordering::SeqCst);
                self.handle.abort();
            }
        }
    }
}

impl StatusBroadcaster {
    /// Start the writer task for `run_id` delivering onto `sink`
    pub fn start(run_id: impl Into<String>, sink: Box<dyn EventSink>) -> (Self, BroadcastWriter) {
        Self::start_with_limits(run_id, sink, ObserverLimits::default())
    }

    pub fn start_with_limits(
        run_id: impl Into<String>,
        sink: Box<dyn EventSink>,
        limits: ObserverLimits,
    ) -> (Self, BroadcastWriter) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(write_events(rx, sink, connected.clone(), limits.send_timeout));
        let writer = BroadcastWriter {
            handle,
            flush_timeout: limits.flush_timeout,
            connected: connected.clone(),
        };
        let broadcaster = Self {
            shared: Arc::new(Shared {
                run_id: run_id.into(),
                tx,
                clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
                connected,
            }),
        };
        (broadcaster, writer)
    }

    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    /// False once the sink failed
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Queue an event; never blocks, never fails
    pub fn emit(&self, kind: EventKind) {
        let mut last = self.shared.clock.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let stamp = if now > *last {
            now
        } else {
            *last + TimeDelta::microseconds(1)
        };
        *last = stamp;
        let event = StatusEvent::new(kind, stamp.to_rfc3339_opts(SecondsFormat::Micros, true));
        // Sent under the clock lock so queue order matches timestamp order.
        if self.shared.tx.send(Message::Event(event)).is_err() {
            debug!("Status writer for {} already closed, dropping event", self.shared.run_id);
        }
    }

    /// Stop the writer once everything queued so far is delivered
    pub fn close(&self) {
        let _ = self.shared.tx.send(Message::Close);
    }

    pub fn iteration_update(&self, iteration: &Iteration, progress: u8, details: impl Into<String>) {
        self.emit(EventKind::IterationUpdate {
            iteration_id: iteration.id.clone(),
            iteration_number: iteration.number,
            status: iteration.status,
            progress,
            details: details.into(),
        });
    }

    /// Open a top-level agent scope under `iteration_id`
    pub fn agent(&self, iteration_id: &str, name: &str) -> AgentScope {
        AgentScope::new(self.clone(), iteration_id, CollaboratorInvocation::new(name, None))
    }

    pub fn completion(&self, success: bool, outcome: &str, iterations: u32, feedback: Option<String>) {
        self.emit(EventKind::Completion {
            run_id: self.shared.run_id.clone(),
            success,
            outcome: outcome.to_string(),
            iterations,
            feedback,
        });
    }

    pub fn error(&self, details: impl Into<String>) {
        self.emit(EventKind::Error {
            run_id: self.shared.run_id.clone(),
            details: details.into(),
        });
    }
}

async fn write_events(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut sink: Box<dyn EventSink>,
    connected: Arc<AtomicBool>,
    send_timeout: Duration,
) {
    while let Some(message) = rx.recv().await {
        let event = match message {
            Message::Event(event) => event,
            Message::Close => break,
        };
        if !connected.load(Ordering::SeqCst) {
            continue;
        }
        match timeout(send_timeout, sink.send(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Observer disconnected, discarding further events: {}", e);
                connected.store(false, Ordering::SeqCst);
            }
            Err(_) => {
                warn!("Observer stalled for {:?}, discarding further events", send_timeout);
                connected.store(false, Ordering::SeqCst);
            }
        }
    }
    if connected.load(Ordering::SeqCst) {
        match timeout(send_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to close event sink: {}", e),
            Err(_) => debug!("Event sink did not close within {:?}", send_timeout),
        }
    }
}

/// Emits agent and tool-call events for one collaborator invocation
#[derive(Clone)]
pub struct AgentScope {
    broadcaster: StatusBroadcaster,
    iteration_id: String,
    invocation: Arc<Mutex<CollaboratorInvocation>>,
    id: String,
    name: String,
    parent_id: Option<String>,
}

impl AgentScope {
    fn new(broadcaster: StatusBroadcaster, iteration_id: &str, invocation: CollaboratorInvocation) -> Self {
        Self {
            broadcaster,
            iteration_id: iteration_id.to_string(),
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            parent_id: invocation.parent_id.clone(),
            invocation: Arc::new(Mutex::new(invocation)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iteration_id(&self) -> &str {
        &self.iteration_id
    }

    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.broadcaster
    }

    /// Copy of the invocation record, including its tool calls
    pub fn snapshot(&self) -> CollaboratorInvocation {
        self.invocation.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Child scope whose events are `nested_agent_update`s referencing this agent
    pub fn nested(&self, name: &str) -> AgentScope {
        AgentScope::new(
            self.broadcaster.clone(),
            &self.iteration_id,
            CollaboratorInvocation::new(name, Some(self.id.clone())),
        )
    }

    pub fn update(&self, status: Status, progress: u8, details: impl Into<String>) {
        self.invocation.lock().unwrap_or_else(|e| e.into_inner()).status = status;
        let details = details.into();
        let kind = match &self.parent_id {
            Some(parent) => EventKind::NestedAgentUpdate {
                iteration_id: self.iteration_id.clone(),
                agent_id: self.id.clone(),
                parent_agent_id: parent.clone(),
                agent_name: self.name.clone(),
                status,
                progress,
                details,
            },
            None => EventKind::AgentUpdate {
                iteration_id: self.iteration_id.clone(),
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                status,
                progress,
                details,
            },
        };
        self.broadcaster.emit(kind);
    }

    pub fn start(&self, details: impl Into<String>) {
        self.update(Status::InProgress, 0, details);
    }

    pub fn complete(&self, details: impl Into<String>) {
        self.update(Status::Completed, 100, details);
    }

    pub fn fail(&self, details: impl Into<String>) {
        self.update(Status::Failed, 100, details);
    }

    /// Fresh id for a tool call made by this agent
    pub fn next_tool_call_id(&self) -> String {
        generate_tool_call_id(&self.id)
    }

    pub fn tool_call(&self, tool_id: &str, tool_name: &str, status: Status, details: impl Into<String>) {
        let details = details.into();
        self.invocation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_tool_call(tool_id, tool_name, status, &details);
        self.broadcaster.emit(EventKind::ToolCall {
            iteration_id: self.iteration_id.clone(),
            agent_id: self.id.clone(),
            tool_id: tool_id.to_string(),
            tool_name: tool_name.to_string(),
            status,
            details,
        });
    }
}
