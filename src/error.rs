//! Error types for the agentdeck core

use thiserror::Error;

/// Main error type for agentdeck operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Agent executable missing or could not be launched.
    ///
    /// Surfaced synchronously by `run`/`create`; no job or session is
    /// registered when this is returned.
    #[error("Failed to spawn agent process: {0}")]
    Spawn(String),

    /// Pseudo-terminal allocation or control error
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Terminal session id not present in the manager's registry
    #[error("Terminal session not found: {0}")]
    SessionNotFound(String),
}

/// Result type alias for agentdeck operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        Self::Pty(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound(id.into())
    }
}
