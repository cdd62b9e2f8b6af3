//! CLI module for buildloop - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
