//! IPC Layer - Unix socket server and client for starting and observing runs
//!
//! This module provides:
//! - Request/response message types
//! - Unix socket server that executes runs and streams their status events
//! - Client used by `buildloop watch`

mod client;
pub mod messages;
mod server;

pub use client::{EventStream, IpcClient};
pub use messages::{ErrorCode, Methods, Request, Response, ResponseError, StartRunResult};
pub use server::{IpcServer, IpcServerConfig, RunSettings};
