//! Error types for the RaifBot backend and client

use thiserror::Error;

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {

    // =============================
    // Domain Errors
    // =============================

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Agent timed out after {0}s")]
    Timeout(u64),

    /// Non-success answer from the RaifBot API, as seen by the client
    #[error("Server answered {status}: {detail}")]
    Remote { status: u16, detail: String },

    // =============================
    // External Library Conversions
    // =============================

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures at the chat history store boundary.
///
/// Each cause keeps its own variant; the HTTP layer decides how much of the
/// distinction the caller gets to see.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid session id '{0}': expected 24 hex characters")]
    InvalidSessionId(String),

    #[error("There is no chat history for id {0}")]
    NotFound(String),

    #[error("Refusing to save an empty chat history for id {0}")]
    EmptyExchanges(String),

    #[error("Failed to {operation} chat history: {message}")]
    Backend { operation: &'static str, message: String },
}

impl StoreError {
    pub fn backend(operation: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: error.to_string(),
        }
    }
}
