//! Global configuration parsing and validation.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// The external command launched by every `start-process` request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CommandConfig {
    /// Program to execute, resolved through `PATH`.
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments passed to the program.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory for spawned processes; inherits the server's when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
        }
    }
}

fn default_program() -> String {
    "ping".into()
}

fn default_args() -> Vec<String> {
    vec!["127.0.0.1".into()]
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_http_port() -> u16 {
    5000
}

fn default_ipc_name() -> String {
    "process-relay".into()
}

fn default_event_buffer() -> usize {
    256
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address the HTTP/WebSocket gateway binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Port for the HTTP/WebSocket gateway.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Named pipe / Unix socket identifier for the local IPC gateway.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Events buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Outbound messages buffered per session before relaying stalls.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// How long shutdown waits for terminated processes to exit.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Command launched for each started process.
    #[serde(default)]
    pub command: CommandConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            ipc_name: default_ipc_name(),
            event_buffer: default_event_buffer(),
            outbound_buffer: default_outbound_buffer(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            command: CommandConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Grace period granted to running processes during shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.command.program.trim().is_empty() {
            return Err(AppError::Config("command.program must not be empty".into()));
        }

        if self.event_buffer == 0 {
            return Err(AppError::Config(
                "event_buffer must be greater than zero".into(),
            ));
        }

        if self.outbound_buffer == 0 {
            return Err(AppError::Config(
                "outbound_buffer must be greater than zero".into(),
            ));
        }

        if let Some(ref dir) = self.command.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("command.working_dir invalid: {err}")))?;
            self.command.working_dir = Some(canonical);
        }

        Ok(())
    }
}
