//! Error types for chathub-core

use thiserror::Error;

/// Result type alias using chathub-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the state engine
#[derive(Error, Debug)]
pub enum Error {
    /// No conversation with this id
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// No project with this id
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// No connection with this id
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// A response is already being generated for this conversation
    #[error("A response is already in progress for conversation {0}")]
    SendInFlight(String),

    /// The model backend failed (network, server, protocol)
    #[error("{0}")]
    Backend(String),

    /// The sync transport failed
    #[error("Sync error: {0}")]
    Sync(String),

    /// An import payload was rejected as a whole
    #[error("Invalid chat history: {0}")]
    Import(String),

    /// Filesystem error while reading or writing a snapshot
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or payload (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a backend error from anything printable
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Self::Backend(message.to_string())
    }
}
