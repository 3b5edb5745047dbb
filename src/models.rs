//! Core data models shared by the backend and the chat client

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::StoreError;

//
// ================= Session Id =================
//

/// Opaque 12-byte session identity rendered as 24 lowercase hex characters.
///
/// Layout follows document-store object ids: 4-byte big-endian unix seconds,
/// 5 random bytes, 3-byte counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

impl SessionId {
    pub const LEN: usize = 24;

    /// Generate a fresh, globally unique session id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];

        let seconds = chrono::Utc::now().timestamp().max(0) as u32;
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());

        let random = uuid::Uuid::new_v4();
        bytes[4..9].copy_from_slice(&random.as_bytes()[..5]);

        let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);

        Self(hex::encode(bytes))
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        let trimmed = value.trim();
        if trimmed.len() != Self::LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidSessionId(value.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

//
// ================= Transcript =================
//

/// One `(user_text, assistant_text)` pair; a two-element array on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange(pub String, pub String);

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self(user.into(), assistant.into())
    }

    pub fn user(&self) -> &str {
        &self.0
    }

    pub fn assistant(&self) -> &str {
        &self.1
    }
}

/// Whether a save created the transcript or extended an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
}

impl SaveOutcome {
    pub fn message(self) -> &'static str {
        match self {
            SaveOutcome::Inserted => "Chat history successfully inserted.",
            SaveOutcome::Updated => "Chat history successfully updated.",
        }
    }
}

//
// ================= HTTP Payloads =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    pub chat_history: Vec<Exchange>,
}

/// Body of the streaming chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
}

//
// ================= Retrieval =================
//

/// Sentinel returned by source lookup when nothing qualifies
pub const NOT_RETRIEVED: &str = "Not retrieved";

/// A document returned by the vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub source: String,
    pub page_content: String,
    pub score: f32,
}

impl RetrievedDocument {
    /// Product name embedded in the page content: the text before the first
    /// "priced" and after the last "Product".
    pub fn short_name(&self) -> String {
        let head = self
            .page_content
            .split("priced")
            .next()
            .unwrap_or_default();
        head.rsplit("Product").next().unwrap_or_default().trim().to_string()
    }
}

type SourceTriple = (Vec<String>, Vec<String>, Vec<String>);

/// Parallel lists describing the documents backing an answer.
/// Serialized as a three-element array `[sources, names, descriptions]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SourceTriple", into = "SourceTriple")]
pub struct DocumentSources {
    pub sources: Vec<String>,
    pub names: Vec<String>,
    pub descriptions: Vec<String>,
}

impl DocumentSources {
    pub fn from_documents(docs: &[RetrievedDocument]) -> Self {
        Self {
            sources: docs.iter().map(|d| d.source.clone()).collect(),
            names: docs.iter().map(RetrievedDocument::short_name).collect(),
            descriptions: docs.iter().map(|d| d.page_content.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl From<SourceTriple> for DocumentSources {
    fn from((sources, names, descriptions): SourceTriple) -> Self {
        Self {
            sources,
            names,
            descriptions,
        }
    }
}

impl From<DocumentSources> for SourceTriple {
    fn from(value: DocumentSources) -> Self {
        (value.sources, value.names, value.descriptions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceLookup {
    Found(DocumentSources),
    NotRetrieved(String),
}

impl SourceLookup {
    pub fn not_retrieved() -> Self {
        Self::NotRetrieved(NOT_RETRIEVED.to_string())
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

//
// ================= Tools =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
}
