//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The OS refused to create the configured command's process.
    Spawn(String),
    /// A terminate request referenced a pid that is not in the active table.
    UnknownProcess(u32),
    /// The OS termination request itself failed.
    TerminationSignal(String),
    /// Listener or connection failure in one of the gateways.
    Transport(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error should be reported back to an observer as a notice
    /// rather than treated as a server-side failure.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_) | Self::UnknownProcess(_) | Self::TerminationSignal(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::UnknownProcess(pid) => write!(f, "unknown process: no running process with pid {pid}"),
            Self::TerminationSignal(msg) => write!(f, "termination signal: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
