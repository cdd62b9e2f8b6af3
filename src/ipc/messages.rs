//! IPC message types for client ↔ server communication.
//!
//! JSON Lines over a Unix stream socket. Requests and responses use familiar
//! field names (id, method, params, result, error) but do NOT implement
//! JSON-RPC 2.0. After a successful `run.subscribe` the server stops answering
//! requests on that connection and streams status events instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Request sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID for correlating responses.
    pub id: u64,
    /// Method name (e.g., "run.start").
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Response sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: ResponseError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Error details in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Unknown method: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }

    pub fn run_not_found(run_id: &str) -> Self {
        Self::new(ErrorCode::RUN_NOT_FOUND, format!("Run not found: {}", run_id))
    }

    pub fn already_subscribed(run_id: &str) -> Self {
        Self::new(
            ErrorCode::ALREADY_SUBSCRIBED,
            format!("Run {} already has an observer", run_id),
        )
    }

    pub fn server_busy(max_clients: usize) -> Self {
        Self::new(
            ErrorCode::SERVER_BUSY,
            format!("Server busy: {} clients connected", max_clients),
        )
    }
}

/// Error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Run ID was never started on this server.
    pub const RUN_NOT_FOUND: i32 = 1001;
    /// Run already streams to another connection.
    pub const ALREADY_SUBSCRIBED: i32 = 1002;
    /// Connection limit reached.
    pub const SERVER_BUSY: i32 = 1003;
}

/// Known method names.
pub struct Methods;

impl Methods {
    pub const RUN_START: &'static str = "run.start";
    pub const RUN_SUBSCRIBE: &'static str = "run.subscribe";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunParams {
    pub project_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRunResult {
    pub run_id: String,
    pub directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub run_id: String,
}

/// Serialize one message as a newline-terminated JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
