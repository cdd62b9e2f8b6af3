//! Error types for buildloop
//!
//! Centralized error handling using thiserror. Supervision code never returns
//! these for process failures; it folds them into structured outcomes instead.

use thiserror::Error;

/// All error types that can occur in buildloop
#[derive(Debug, Error)]
pub enum BuildloopError {
    /// Run not registered with the server
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// An external collaborator failed or returned garbage
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// IPC communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for buildloop operations
pub type Result<T> = std::result::Result<T, BuildloopError>;
