//! Configuration loading for buildloop
//!
//! YAML file with every section defaulted, looked up through a fallback chain:
//! explicit path, `~/.config/buildloop/buildloop.yml`, `./buildloop.yml`, defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BuildloopError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    #[serde(rename = "loop")]
    pub run_loop: LoopConfig,
    pub process: ProcessConfig,
    pub server: ServerConfig,
    pub collaborators: CollaboratorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Ask the feedback analyzer after the last failing iteration too.
    pub feedback_on_final_iteration: bool,
    pub projects_dir: PathBuf,
    /// Longest a single status event may take to reach the observer.
    pub observer_send_timeout_ms: u64,
    /// Longest the end of a run waits for queued events to reach the observer.
    pub observer_flush_timeout_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            feedback_on_final_iteration: false,
            projects_dir: PathBuf::from("generated_projects"),
            observer_send_timeout_ms: 5_000,
            observer_flush_timeout_ms: 10_000,
        }
    }
}

impl LoopConfig {
    pub fn observer_send_timeout(&self) -> Duration {
        Duration::from_millis(self.observer_send_timeout_ms)
    }

    pub fn observer_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.observer_flush_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub install_command: Vec<String>,
    /// Runs after a successful-or-not install; empty disables it.
    pub reset_command: Vec<String>,
    pub server_command: Vec<String>,
    pub test_command: Vec<String>,
    pub install_timeout_ms: u64,
    pub reset_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub test_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            install_command: argv(&["npm", "install"]),
            reset_command: argv(&["npm", "run", "reset-db"]),
            server_command: argv(&["npm", "run", "dev"]),
            test_command: argv(&["npx", "cypress", "run", "--headless"]),
            install_timeout_ms: 300_000,
            reset_timeout_ms: 120_000,
            settle_delay_ms: 10_000,
            test_timeout_ms: 120_000,
            drain_timeout_ms: 5_000,
            grace_period_ms: 5_000,
        }
    }
}

impl ProcessConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_clients: usize,
    /// Started runs nobody subscribed to are dropped after this long.
    pub pending_run_ttl_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/buildloop.sock"),
            max_clients: 16,
            pending_run_ttl_ms: 600_000,
        }
    }
}

impl ServerConfig {
    pub fn pending_run_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_run_ttl_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    pub code_generator: CollaboratorCommand,
    pub test_generator: CollaboratorCommand,
    pub feedback_analyzer: CollaboratorCommand,
    pub schema_generator: CollaboratorCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorCommand {
    pub command: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CollaboratorCommand {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_ms: 600_000,
        }
    }
}

impl CollaboratorCommand {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            run_loop: LoopConfig::default(),
            process: ProcessConfig::default(),
            server: ServerConfig::default(),
            collaborators: CollaboratorsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let project_name = env!("CARGO_PKG_NAME");

        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            BuildloopError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|e| BuildloopError::Config(format!("{} in {}", e, path.display())))?;

        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parse a YAML document; missing keys fall back to defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| BuildloopError::Config(format!("Failed to parse config: {}", e)))
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
