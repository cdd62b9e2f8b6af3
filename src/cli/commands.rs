//! CLI command definitions using clap.
//!
//! - run: drive a run locally, printing its status events
//! - serve: accept runs over a Unix socket
//! - watch: start a run on a server and follow it

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Buildloop - generate, test and fix a web application until its tests pass
#[derive(Parser, Debug)]
#[command(name = "buildloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a project locally until its tests pass or the iteration cap is hit
    Run {
        /// Project name
        #[arg(short, long)]
        name: String,

        /// What the application should do
        description: String,

        /// Override loop.max_iterations
        #[arg(short = 'm', long)]
        max_iterations: Option<u32>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Serve runs over a Unix socket
    Serve {
        /// Override server.socket_path
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Start a run on a server and follow its events
    Watch {
        /// Project name
        #[arg(short, long)]
        name: String,

        /// What the application should do
        description: String,

        /// Override server.socket_path
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}
