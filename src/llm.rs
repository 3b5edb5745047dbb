//! OpenAI-compatible chat completion and embedding client
//!
//! Holds one credential/model pair. A new client is built on every
//! credential swap; the underlying reqwest::Client is shared for pooling.

use crate::error::BotError;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Build the pooled HTTP client shared by every outbound integration
pub fn http_client() -> Client {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        embedding_model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: embedding_model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn completion_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.0,
            stream,
        }
    }

    /// One-shot completion returning the full assistant text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.completion_body(messages, false))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Chat completion error response ({}): {}", status, error_text);
            return Err(BotError::Agent(format!(
                "Chat completion failed with HTTP {}: {}",
                status, error_text
            )));
        }

        let completion: CompletionResponse = response.json().await?;
        let answer = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BotError::Agent("Empty response from chat completion".to_string()))?;

        debug!(model = %self.model, chars = answer.len(), "Chat completion received");
        Ok(answer)
    }

    /// Streaming completion yielding content deltas in arrival order.
    pub fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> crate::Result<BoxStream<'static, crate::Result<String>>> {
        let mut events = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.completion_body(messages, true))
            .eventsource()
            .map_err(|e| BotError::Agent(format!("Cannot open completion stream: {}", e)))?;

        let stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        if msg.data == "[DONE]" {
                            break;
                        }
                        match serde_json::from_str::<StreamChunk>(&msg.data) {
                            Ok(chunk) => {
                                let delta = chunk
                                    .choices
                                    .into_iter()
                                    .next()
                                    .and_then(|c| c.delta.content)
                                    .unwrap_or_default();
                                if !delta.is_empty() {
                                    yield Ok(delta);
                                }
                            }
                            Err(e) => {
                                yield Err(BotError::Agent(format!("Failed to parse stream chunk: {}", e)));
                                break;
                            }
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(BotError::Agent(format!("Completion stream error: {}", e)));
                        break;
                    }
                }
            }
            events.close();
        };

        Ok(stream.boxed())
    }

    /// Embed a single text with the configured embedding model.
    pub async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.embedding_model,
                input: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BotError::Agent(format!(
                "Embedding request failed with HTTP {}: {}",
                status, error_text
            )));
        }

        let embedding: EmbeddingResponse = response.json().await?;
        embedding
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BotError::Agent("Embedding response contained no vectors".to_string()))
    }

    /// Trial call used to validate a credential/model pair before it goes live.
    pub async fn verify(&self) -> crate::Result<()> {
        info!(model = %self.model, "Validating credential with a trial completion");
        self.complete(&[
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("Hello, who are you?"),
        ])
        .await
        .map(|_| ())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
