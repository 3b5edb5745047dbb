//! Retrieval-augmented agent
//!
//! Product search over the vector index first, web search when the index has
//! nothing above threshold, then an answer from the chat model grounded in
//! whichever context was found.

use super::{emit, Agent, AgentProvider, TokenSink};
use crate::config::Settings;
use crate::llm::{ChatMessage, OpenAiClient};
use crate::models::RetrievedDocument;
use crate::tools::{
    create_default_registry, PineconeRetriever, Retriever, ToolRegistry, PRODUCT_SEARCH,
    WEB_SEARCH,
};
use crate::Result;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RECOMMENDATION_PROMPT: &str = r#"You are a fashion shopping assistant.

Generate a natural language response recommending products with justifications
(e.g. "Based on your [requirements], we recommend product X from brand Y because it
has a high rating and is within your budget"), fully supported by the provided context.
Every product from the context must be mentioned. If a product misses a requirement,
say so and explain; for example, if a product is slightly above the budget but fits
every other requirement, describe it.

When the context holds no products, answer the question directly and concisely."#;

pub struct RagAgent {
    llm: OpenAiClient,
    retriever: Arc<dyn Retriever>,
    tools: ToolRegistry,
}

impl RagAgent {
    pub fn new(llm: OpenAiClient, retriever: Arc<dyn Retriever>, tools: ToolRegistry) -> Self {
        Self {
            llm,
            retriever,
            tools,
        }
    }

    /// Gather context through the tools; tool failures degrade to less context.
    async fn gather_context(&self, query: &str) -> String {
        for tool in [PRODUCT_SEARCH, WEB_SEARCH] {
            match self.tools.run(tool, query).await {
                Ok(output) if output.success => {
                    debug!(tool, "Tool produced context");
                    return output
                        .data
                        .get("context")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                }
                Ok(_) => debug!(tool, "Tool found nothing relevant"),
                Err(e) => warn!(tool, "Tool failed, trying the next one: {}", e),
            }
        }
        String::new()
    }

    async fn build_messages(&self, query: &str) -> Vec<ChatMessage> {
        let context = self.gather_context(query).await;
        vec![
            ChatMessage::system(RECOMMENDATION_PROMPT),
            ChatMessage::user(format!(
                "Context: {}\nQuestion: {}\nAnswer: ",
                context, query
            )),
        ]
    }
}

#[async_trait::async_trait]
impl Agent for RagAgent {
    fn model_name(&self) -> &str {
        self.llm.model()
    }

    async fn stream(&self, query: &str, sink: &TokenSink) -> Result<()> {
        let messages = self.build_messages(query).await;
        let mut deltas = self.llm.complete_stream(&messages)?;

        while let Some(delta) = deltas.next().await {
            emit(sink, delta?)?;
        }
        Ok(())
    }

    async fn run(&self, query: &str) -> Result<String> {
        let messages = self.build_messages(query).await;
        self.llm.complete(&messages).await
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        self.retriever.relevant_documents(query).await
    }

    async fn verify(&self) -> Result<()> {
        self.llm.verify().await
    }
}

/// Wires a `RagAgent` for each credential/model pair.
pub struct RagProvider {
    client: Client,
    settings: Settings,
}

impl RagProvider {
    pub fn new(client: Client, settings: Settings) -> Self {
        Self { client, settings }
    }
}

impl AgentProvider for RagProvider {
    fn build(&self, api_key: &str, model: &str) -> Result<Arc<dyn Agent>> {
        let llm = OpenAiClient::new(
            self.client.clone(),
            api_key,
            model,
            self.settings.embedding_name.clone(),
            self.settings.openai_base_url.clone(),
        );

        let retriever: Arc<dyn Retriever> = Arc::new(PineconeRetriever::new(
            self.client.clone(),
            llm.clone(),
            &self.settings,
        ));
        let tools = create_default_registry(
            retriever.clone(),
            self.client.clone(),
            &self.settings.search_base_url,
        );

        info!(model, tools = ?tools.list(), "Built retrieval agent");
        Ok(Arc::new(RagAgent::new(llm, retriever, tools)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::llm::http_client;
    use crate::models::{ToolInput, ToolOutput};
    use crate::tools::{ProductSearchTool, Tool};
    use serde_json::json;

    struct FixedRetriever(Result<Vec<RetrievedDocument>>);

    #[async_trait::async_trait]
    impl Retriever for FixedRetriever {
        async fn relevant_documents(&self, _query: &str) -> Result<Vec<RetrievedDocument>> {
            match &self.0 {
                Ok(docs) => Ok(docs.clone()),
                Err(e) => Err(BotError::Agent(e.to_string())),
            }
        }
    }

    /// Web search stand-in answering with a fixed snippet, or failing.
    struct StubWebSearch(Option<&'static str>);

    #[async_trait::async_trait]
    impl Tool for StubWebSearch {
        fn name(&self) -> &'static str {
            WEB_SEARCH
        }

        fn description(&self) -> &'static str {
            "stub"
        }

        async fn execute(&self, _input: &ToolInput) -> Result<ToolOutput> {
            match self.0 {
                Some(text) => Ok(ToolOutput {
                    success: true,
                    data: json!({ "context": text }),
                }),
                None => Err(BotError::Agent("search engine unreachable".to_string())),
            }
        }
    }

    fn agent(products: Result<Vec<RetrievedDocument>>, web: Option<&'static str>) -> RagAgent {
        let retriever: Arc<dyn Retriever> = Arc::new(FixedRetriever(products));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ProductSearchTool::new(retriever.clone())));
        tools.register(Arc::new(StubWebSearch(web)));

        let llm = OpenAiClient::new(http_client(), "sk-test", "gpt-4o", "emb", "http://127.0.0.1:9");
        RagAgent::new(llm, retriever, tools)
    }

    fn jacket() -> RetrievedDocument {
        RetrievedDocument {
            source: "jacket.jpg".to_string(),
            page_content: "Product Denim Jacket priced 40".to_string(),
            score: 0.8,
        }
    }

    #[tokio::test]
    async fn test_product_hit_wins_over_web_search() {
        let agent = agent(Ok(vec![jacket()]), Some("from the web"));
        assert_eq!(
            agent.gather_context("denim jacket").await,
            "Product Denim Jacket priced 40"
        );
    }

    #[tokio::test]
    async fn test_empty_product_result_falls_back_to_web() {
        let agent = agent(Ok(Vec::new()), Some("Denim is a cotton twill."));
        assert_eq!(
            agent.gather_context("what is denim").await,
            "Denim is a cotton twill."
        );
    }

    #[tokio::test]
    async fn test_failing_tools_leave_empty_context() {
        let agent = agent(Err(BotError::Agent("index offline".to_string())), None);
        assert_eq!(agent.gather_context("anything").await, "");

        let messages = agent.build_messages("anything").await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Context: \nQuestion: anything\nAnswer: ");
    }
}
