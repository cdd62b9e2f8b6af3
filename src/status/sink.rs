//! Event sinks: where a broadcaster's writer task delivers events.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use colored::Colorize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::events::{EventKind, StatusEvent};
use crate::domain::Status;
use crate::error::{BuildloopError, Result};

/// Destination for one run's event stream
#[async_trait]
pub trait EventSink: Send {
    /// Deliver one event; an error marks the observer disconnected
    async fn send(&mut self, event: &StatusEvent) -> Result<()>;

    /// Flush and release the destination
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Newline-delimited JSON onto any async writer (socket, stdout)
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for JsonLinesSink<W> {
    async fn send(&mut self, event: &StatusEvent) -> Result<()> {
        let mut line = event.to_json_line()?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Coloured, indented human output on stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }

    fn render(event: &StatusEvent) -> String {
        let status_colored = |status: &Status, text: String| match status {
            Status::Completed => text.green().to_string(),
            Status::Failed => text.red().to_string(),
            Status::InProgress => text.yellow().to_string(),
            Status::Pending => text.dimmed().to_string(),
        };

        match &event.kind {
            EventKind::IterationUpdate { status, details, .. } => format!(
                "{} {}",
                status_colored(status, event.message.clone()).bold(),
                details.dimmed()
            ),
            EventKind::AgentUpdate { status, details, .. } => format!(
                "  {} {}",
                status_colored(status, event.message.clone()),
                details.dimmed()
            ),
            EventKind::NestedAgentUpdate { status, details, .. } => format!(
                "    {} {}",
                status_colored(status, event.message.clone()),
                details.dimmed()
            ),
            EventKind::ToolCall { status, details, .. } => format!(
                "      {} {}",
                status_colored(status, event.message.clone()),
                details.dimmed()
            ),
            EventKind::Completion { success, feedback, .. } => {
                let headline = if *success {
                    event.message.green().bold().to_string()
                } else {
                    event.message.red().bold().to_string()
                };
                match feedback {
                    Some(feedback) if !success => format!("{}\n{}", headline, feedback.dimmed()),
                    _ => headline,
                }
            }
            EventKind::Error { .. } => event.message.red().bold().to_string(),
        }
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    async fn send(&mut self, event: &StatusEvent) -> Result<()> {
        println!("{}", Self::render(event));
        Ok(())
    }
}

/// In-memory sink; clones share the same event list
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
    /// Fail every send after this many successful ones
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose observer goes away after `count` events
    pub fn disconnecting_after(count: usize) -> Self {
        Self {
            fail_after: Some(count),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&mut self, event: &StatusEvent) -> Result<()> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if self.fail_after.is_some_and(|limit| events.len() >= limit) {
            return Err(BuildloopError::Ipc("observer disconnected".into()));
        }
        events.push(event.clone());
        Ok(())
    }
}
