//! Agent capability interface
//!
//! The agent turns a query into response text, optionally token by token.
//! Tokens flow through an unbounded, order-preserving channel; the relay owns
//! the terminal `End` marker.

use crate::error::BotError;
use crate::models::RetrievedDocument;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod rag;
pub use rag::{RagAgent, RagProvider};

/// Item carried from the agent task to the HTTP consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    End,
}

pub type TokenSink = mpsc::UnboundedSender<StreamEvent>;

/// Forward one token; fails once the consumer has gone away.
pub fn emit(sink: &TokenSink, token: impl Into<String>) -> Result<()> {
    sink.send(StreamEvent::Token(token.into()))
        .map_err(|_| BotError::Agent("Token consumer disconnected".to_string()))
}

/// Trait for the tool-augmented reasoning component
#[async_trait]
pub trait Agent: Send + Sync {
    fn model_name(&self) -> &str;

    /// Emit response tokens into `sink` in production order.
    async fn stream(&self, query: &str, sink: &TokenSink) -> Result<()>;

    /// Full response as one unit.
    async fn run(&self, query: &str) -> Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.stream(query, &tx).await?;
        drop(tx);

        let mut answer = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => answer.push_str(&token),
                StreamEvent::End => break,
            }
        }
        Ok(answer)
    }

    /// Documents relevant to `query`, already filtered by score threshold.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>>;

    /// Trial call proving the credential/model pair is accepted.
    async fn verify(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds agents for a credential/model pair
pub trait AgentProvider: Send + Sync {
    fn build(&self, api_key: &str, model: &str) -> Result<Arc<dyn Agent>>;
}

/// The process-wide agent together with the credential it was built from.
/// Swapped as a whole so readers never see a mixed pair.
pub struct AgentHandle {
    pub agent: Arc<dyn Agent>,
    pub api_key: String,
    pub model: String,
    pub generation: u64,
}

impl AgentHandle {
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }
}

/// Keep the first 3 and last 4 characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Deterministic agent for development & testing.
/// Keeps the relay functional without an LLM dependency.
pub struct ScriptedAgent {
    model: String,
    tokens: Vec<String>,
    documents: Vec<RetrievedDocument>,
    fail_after: Option<usize>,
    reject_verify: bool,
}

impl ScriptedAgent {
    pub fn new(model: impl Into<String>, tokens: Vec<String>) -> Self {
        Self {
            model: model.into(),
            tokens,
            documents: Vec::new(),
            fail_after: None,
            reject_verify: false,
        }
    }

    pub fn with_documents(mut self, documents: Vec<RetrievedDocument>) -> Self {
        self.documents = documents;
        self
    }

    /// Emit `count` tokens, then fail.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn rejecting_verify(mut self) -> Self {
        self.reject_verify = true;
        self
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, _query: &str, sink: &TokenSink) -> Result<()> {
        for (index, token) in self.tokens.iter().enumerate() {
            if self.fail_after == Some(index) {
                return Err(BotError::Agent("Scripted agent failure".to_string()));
            }
            emit(sink, token.clone())?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedDocument>> {
        if self.fail_after.is_some() {
            return Err(BotError::Agent("Scripted retrieval failure".to_string()));
        }
        Ok(self.documents.clone())
    }

    async fn verify(&self) -> Result<()> {
        if self.reject_verify {
            return Err(BotError::Agent("Incorrect API key provided".to_string()));
        }
        Ok(())
    }
}

/// Provider producing scripted agents; keys listed in `rejected_keys`
/// fail verification.
pub struct ScriptedProvider {
    pub tokens: Vec<String>,
    pub documents: Vec<RetrievedDocument>,
    pub rejected_keys: Vec<String>,
}

impl ScriptedProvider {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            documents: Vec::new(),
            rejected_keys: Vec::new(),
        }
    }
}

impl AgentProvider for ScriptedProvider {
    fn build(&self, api_key: &str, model: &str) -> Result<Arc<dyn Agent>> {
        let mut agent = ScriptedAgent::new(model, self.tokens.clone())
            .with_documents(self.documents.clone());
        if self.rejected_keys.iter().any(|k| k == api_key) {
            agent = agent.rejecting_verify();
        }
        Ok(Arc::new(agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_concatenates_stream() {
        let agent = ScriptedAgent::new("stub", tokens(&["Hi", ", ", "there", "!"]));
        assert_eq!(agent.run("Hello").await.unwrap(), "Hi, there!");
    }

    #[tokio::test]
    async fn test_emit_fails_without_consumer() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(emit(&tx, "lost").is_err());
    }

    #[tokio::test]
    async fn test_failing_agent_keeps_emitted_tokens() {
        let agent = ScriptedAgent::new("stub", tokens(&["a", "b", "c"])).failing_after(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(agent.stream("q", &tx).await.is_err());
        assert_eq!(rx.recv().await, Some(StreamEvent::Token("a".to_string())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Token("b".to_string())));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("sk-abcdefghijklmnop"), "sk-...mnop");
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret(""), "****");
    }
}
