//! Vector-index retrieval
//!
//! Embeds the query and asks the Pinecone data plane for the nearest stored
//! items, keeping only matches above the score threshold.

use crate::config::Settings;
use crate::error::BotError;
use crate::llm::OpenAiClient;
use crate::models::RetrievedDocument;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.05;
pub const DEFAULT_TOP_K: usize = 4;

/// Retrieval capability used by the agent and by source lookup
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn relevant_documents(&self, query: &str) -> Result<Vec<RetrievedDocument>>;
}

pub struct PineconeRetriever {
    client: Client,
    embedder: OpenAiClient,
    api_key: String,
    environment: String,
    index_name: String,
    index_host: OnceCell<String>,
    score_threshold: f32,
    top_k: usize,
}

impl PineconeRetriever {
    pub fn new(client: Client, embedder: OpenAiClient, settings: &Settings) -> Self {
        let index_host = match &settings.pinecone_index_host {
            Some(host) => OnceCell::new_with(Some(normalize_host(host))),
            None => OnceCell::new(),
        };

        Self {
            client,
            embedder,
            api_key: settings.pinecone_api_key.clone(),
            environment: settings.pinecone_env.clone(),
            index_name: settings.index_name.clone(),
            index_host,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    async fn host(&self) -> Result<&str> {
        self.index_host
            .get_or_try_init(|| self.resolve_host())
            .await
            .map(String::as_str)
    }

    /// Ask the control plane for the index host, falling back to the
    /// environment-scoped legacy controller.
    async fn resolve_host(&self) -> Result<String> {
        let modern = self
            .client
            .get(format!("https://api.pinecone.io/indexes/{}", self.index_name))
            .header("Api-Key", &self.api_key)
            .send()
            .await?;

        if modern.status().is_success() {
            let body: Value = modern.json().await?;
            if let Some(host) = body.get("host").and_then(Value::as_str) {
                info!(index = %self.index_name, "Resolved vector index host");
                return Ok(normalize_host(host));
            }
        }

        let legacy = self
            .client
            .get(format!(
                "https://controller.{}.pinecone.io/databases/{}",
                self.environment, self.index_name
            ))
            .header("Api-Key", &self.api_key)
            .send()
            .await?;

        if !legacy.status().is_success() {
            return Err(BotError::Agent(format!(
                "Vector index '{}' not found in environment '{}' (HTTP {})",
                self.index_name,
                self.environment,
                legacy.status()
            )));
        }

        let body: Value = legacy.json().await?;
        body.pointer("/status/host")
            .and_then(Value::as_str)
            .map(normalize_host)
            .ok_or_else(|| BotError::Agent("Vector index description has no host".to_string()))
    }
}

#[async_trait::async_trait]
impl Retriever for PineconeRetriever {
    async fn relevant_documents(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        let vector = self.embedder.embed(query).await?;
        let host = self.host().await?;

        let response = self
            .client
            .post(format!("{}/query", host))
            .header("Api-Key", &self.api_key)
            .json(&QueryRequest {
                vector,
                top_k: self.top_k,
                include_metadata: true,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BotError::Agent(format!(
                "Vector query failed with HTTP {}: {}",
                status, error_text
            )));
        }

        let result: QueryResponse = response.json().await?;
        let documents = filter_matches(result.matches, self.score_threshold);

        debug!(count = documents.len(), threshold = self.score_threshold, "Vector query finished");
        Ok(documents)
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Keep matches at or above the threshold that carry both text and source.
fn filter_matches(matches: Vec<QueryMatch>, threshold: f32) -> Vec<RetrievedDocument> {
    matches
        .into_iter()
        .filter(|m| m.score >= threshold)
        .filter_map(|m| {
            let metadata = m.metadata?;
            Some(RetrievedDocument {
                source: metadata.get("source")?.as_str()?.to_string(),
                page_content: metadata.get("text")?.as_str()?.to_string(),
                score: m.score,
            })
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    vector: Vec<f32>,
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    score: f32,
    metadata: Option<serde_json::Map<String, Value>>,
}
