//! Tool trait and registry
//!
//! Tools are the agent's outward capabilities: product search over the
//! vector index and a web search used when the index has nothing relevant.

pub mod retriever;

pub use retriever::{PineconeRetriever, Retriever};

use crate::error::BotError;
use crate::models::{DocumentSources, ToolInput, ToolOutput};
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const PRODUCT_SEARCH: &str = "product_search";
pub const WEB_SEARCH: &str = "web_search";

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Run a tool by name with a plain-text query.
    pub async fn run(&self, name: &str, query: &str) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| BotError::Agent(format!("Tool not found: {}", name)))?;

        tool.execute(&ToolInput {
            tool_name: name.to_string(),
            parameters: json!({ "query": query }),
        })
        .await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn require_query(input: &ToolInput) -> Result<&str> {
    input
        .parameters
        .get("query")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| BotError::Agent(format!("Expected 'query' for tool {}", input.tool_name)))
}

/// Searches the product index for items matching the user's requirements
pub struct ProductSearchTool {
    retriever: Arc<dyn Retriever>,
}

impl ProductSearchTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait::async_trait]
impl Tool for ProductSearchTool {
    fn name(&self) -> &'static str {
        PRODUCT_SEARCH
    }

    fn description(&self) -> &'static str {
        "Searches and returns fashion products that meet the stated requirements (age, gender, location, brand, price, availability), preferring high rating first and click rate second."
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let query = require_query(input)?;
        let documents = self.retriever.relevant_documents(query).await?;

        let context = documents
            .iter()
            .map(|d| d.page_content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ToolOutput {
            success: !documents.is_empty(),
            data: json!({
                "context": context,
                "sources": DocumentSources::from_documents(&documents),
            }),
        })
    }
}

/// Free-text web search through the DuckDuckGo instant answer API
pub struct WebSearchTool {
    client: Client,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH
    }

    fn description(&self) -> &'static str {
        "Searches the internet for information that product_search cannot find."
    }

    async fn execute(&self, input: &ToolInput) -> Result<ToolOutput> {
        let query = require_query(input)?;

        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Agent(format!(
                "Web search returned HTTP {} for '{}'",
                status, query
            )));
        }

        let body: Value = response.json().await?;
        let context = instant_answer_text(&body);

        Ok(ToolOutput {
            success: !context.is_empty(),
            data: json!({ "context": context }),
        })
    }
}

/// Flatten an instant-answer payload into plain text snippets.
fn instant_answer_text(body: &Value) -> String {
    let mut snippets: Vec<&str> = ["Answer", "AbstractText", "Definition"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .collect();

    if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
        snippets.extend(
            topics
                .iter()
                .filter_map(|t| t.get("Text").and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .take(5),
        );
    }

    snippets.join("\n")
}

/// Create the registry the agent works with.
pub fn create_default_registry(
    retriever: Arc<dyn Retriever>,
    client: Client,
    search_base_url: &str,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ProductSearchTool::new(retriever)));
    registry.register(Arc::new(WebSearchTool::new(client, search_base_url)));
    registry
}
