//! Error types for meadow-node.

use thiserror::Error;

/// Result type for meadow-node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol core error
    #[error("Protocol error: {0}")]
    Protocol(#[from] meadow_protocol::Error),

    /// Send or receive could not complete
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer side of a channel is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audit trail could not be read or merged
    #[error("Audit error: {0}")]
    Audit(String),

    /// A node task panicked or was cancelled
    #[error("Task error: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Join(e.to_string())
    }
}
