//! Buildloop - a generate → test → fix loop for scaffolded web applications
//!
//! A run asks a code generator for an application, a test generator for an
//! end-to-end suite, then installs dependencies, starts the application server
//! and runs the suite. Failures go to a feedback analyzer whose feedback seeds
//! the next iteration, up to a cap. Every step is reported as an ordered stream
//! of status events.

pub mod collaborator;
pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod ipc;
pub mod runner;
pub mod status;
pub mod supervisor;
pub mod tools;
pub mod validation;
pub mod workspace;

pub use error::{BuildloopError, Result};
