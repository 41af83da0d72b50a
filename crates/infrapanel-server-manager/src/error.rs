use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerManagerError {
    #[error("Server '{0}' not found")]
    NotFound(String),

    #[error("More than one server is named '{0}'")]
    Ambiguous(String),

    #[error("Server '{0}' is already running or in a transitional state")]
    AlreadyRunning(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error(
        "Console input for server '{0}' is unavailable because the process was re-attached after a panel restart. Restart the server to regain command access"
    )]
    StdinUnavailable(String),

    #[error("Failed to spawn server process: {0}")]
    SpawnFailed(String),

    #[error("Launch artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("Artifact download failed: {0}")]
    Artifact(#[from] reqwest::Error),

    #[error("Console log for server '{0}' does not exist")]
    LogNotFound(String),

    #[error("Invalid memory size '{0}'")]
    InvalidMemory(String),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerManagerError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn signal(msg: impl Into<String>) -> Self {
        Self::Signal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ServerManagerError>;
