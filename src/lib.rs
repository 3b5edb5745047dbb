//! RaifBot
//!
//! A retrieval-augmented shopping assistant:
//! - Session-scoped chat history store (Postgres or in-memory)
//! - Streaming chat relay in front of a tool-augmented agent
//! - Credential/model hot swap without restarting the server
//! - Terminal chat client speaking the same HTTP API
//!
//! FLOW:
//! CLIENT → RELAY → AGENT → RELAY (tokens) → CLIENT → HISTORY STORE

pub mod agent;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod relay;
pub mod tools;

pub use error::{BotError, Result, StoreError};

// Re-export common types
pub use models::*;
pub use relay::Relay;
