use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use buildloop::config::Config;
use buildloop::domain::Run;
use buildloop::ipc::{IpcClient, IpcServer, IpcServerConfig, RunSettings};
use buildloop::runner::Orchestrator;
use buildloop::status::{ConsoleSink, EventKind, EventSink, JsonLinesSink};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buildloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("buildloop.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Returns whether the run succeeded
async fn run_application(cli: &Cli, config: Config) -> Result<bool> {
    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            name,
            description,
            max_iterations,
            json,
        } => handle_run_command(config, name, description, *max_iterations, *json).await,
        Commands::Serve { socket } => {
            handle_serve_command(config, socket.clone()).await?;
            Ok(true)
        }
        Commands::Watch {
            name,
            description,
            socket,
            json,
        } => handle_watch_command(&config, name, description, socket.clone(), *json).await,
    }
}

async fn handle_run_command(
    config: Config,
    name: &str,
    description: &str,
    max_iterations: Option<u32>,
    json: bool,
) -> Result<bool> {
    let orchestrator = Orchestrator::from_config(&config).context("Failed to set up the orchestrator")?;
    let cap = max_iterations.unwrap_or(config.run_loop.max_iterations);
    let run = Run::new(name, description, &config.run_loop.projects_dir, cap);
    info!("Running {} in {}", run.id, run.working_dir.display());
    eprintln!(
        "{} {} in {}",
        "Starting".green(),
        run.id,
        run.working_dir.display()
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted; stopping after the current iteration".yellow());
            flag.store(true, Ordering::SeqCst);
        }
    });

    let sink: Box<dyn EventSink> = if json {
        Box::new(JsonLinesSink::new(tokio::io::stdout()))
    } else {
        Box::new(ConsoleSink::new())
    };
    let report = orchestrator.run_to_completion(run, sink, cancel).await;
    info!("Run ended {} after {} iteration(s)", report.outcome.label(), report.iterations);
    Ok(report.outcome.is_success())
}

async fn handle_serve_command(config: Config, socket: Option<PathBuf>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config).context("Failed to set up the orchestrator")?;
    let mut server_config = IpcServerConfig::from_config(&config.server);
    if let Some(socket) = socket {
        server_config = server_config.with_socket_path(socket);
    }
    let server = Arc::new(IpcServer::new(
        server_config,
        RunSettings::from_config(&config),
        Arc::new(orchestrator),
    ));
    println!("{} {}", "Serving on".green(), server.socket_path().display());

    let stopper = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.shutdown();
        }
    });

    server.run().await.context("Server failed")?;
    Ok(())
}

async fn handle_watch_command(
    config: &Config,
    name: &str,
    description: &str,
    socket: Option<PathBuf>,
    json: bool,
) -> Result<bool> {
    let client = IpcClient::new(socket.unwrap_or_else(|| config.server.socket_path.clone()));
    let started = client
        .start_run(name, description)
        .await
        .context("Failed to start run")?;
    eprintln!("{} {} in {}", "Started".green(), started.run_id, started.directory);

    let mut events = client
        .subscribe(&started.run_id)
        .await
        .context("Failed to subscribe")?;
    let mut console = ConsoleSink::new();
    let mut success = false;
    while let Some(event) = events.next_event().await.context("Event stream failed")? {
        if json {
            println!("{}", event.to_json_line()?);
        } else {
            console.send(&event).await?;
        }
        if let EventKind::Completion { success: done, .. } = &event.kind {
            success = *done;
        }
    }
    Ok(success)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    let success = run_application(&cli, config).await.context("Application failed")?;
    if !success {
        std::process::exit(1);
    }
    Ok(())
}
