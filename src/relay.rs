//! Chat relay
//!
//! Bridges client queries to the current agent. Streaming runs the agent as a
//! producer task feeding an unbounded channel; the HTTP body drains it.
//! Dropping the body stream aborts the producer.

use crate::agent::{Agent, AgentHandle, AgentProvider, StreamEvent};
use crate::error::BotError;
use crate::models::{DocumentSources, SourceLookup};
use crate::Result;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct Relay {
    handle: RwLock<Arc<AgentHandle>>,
    provider: Arc<dyn AgentProvider>,
    timeout: Duration,
}

impl Relay {
    /// Build the initial agent without a trial call; startup must not depend
    /// on the provider being reachable.
    pub fn new(
        provider: Arc<dyn AgentProvider>,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let agent = provider.build(api_key, model)?;
        Ok(Self::with_initial_agent(provider, agent, api_key, model, timeout))
    }

    /// Start from an agent that did not come from `provider`, e.g. an offline
    /// agent. Later swaps still go through `provider` and its trial call.
    pub fn with_initial_agent(
        provider: Arc<dyn AgentProvider>,
        agent: Arc<dyn Agent>,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Self {
        let handle = AgentHandle {
            agent,
            api_key: api_key.to_string(),
            model: model.to_string(),
            generation: 0,
        };

        Self {
            handle: RwLock::new(Arc::new(handle)),
            provider,
            timeout,
        }
    }

    /// Snapshot of the active handle; callers keep it for their whole request.
    pub async fn current(&self) -> Arc<AgentHandle> {
        self.handle.read().await.clone()
    }

    pub async fn current_model(&self) -> String {
        self.current().await.model.clone()
    }

    pub async fn current_token(&self) -> String {
        self.current().await.masked_api_key()
    }

    /// Start a streaming answer. Tokens arrive in production order, paced by
    /// `delay` between forwards.
    pub async fn chat_stream(&self, query: String, delay: Duration) -> Result<TokenStream> {
        ensure_query(&query)?;

        let handle = self.current().await;
        let timeout = self.timeout;
        let (tx, rx) = mpsc::unbounded_channel();

        info!(generation = handle.generation, model = %handle.model, "Dispatching streaming chat");

        let producer = tokio::spawn(async move {
            match tokio::time::timeout(timeout, handle.agent.stream(&query, &tx)).await {
                Ok(Ok(())) => debug!("Agent stream completed"),
                Ok(Err(e)) => error!("Agent stream stopped early: {}", e),
                Err(_) => warn!("Agent stream timed out after {}s", timeout.as_secs()),
            }
            let _ = tx.send(StreamEvent::End);
        });

        Ok(TokenStream::new(rx, producer, delay))
    }

    /// Full answer as one unit.
    pub async fn chat_once(&self, query: &str) -> Result<String> {
        ensure_query(query)?;

        let handle = self.current().await;
        info!(generation = handle.generation, model = %handle.model, "Dispatching chat");

        tokio::time::timeout(self.timeout, handle.agent.run(query))
            .await
            .map_err(|_| BotError::Timeout(self.timeout.as_secs()))?
    }

    /// Documents backing `query`, or the "not retrieved" sentinel when none
    /// qualify or retrieval fails.
    pub async fn get_source(&self, query: &str) -> SourceLookup {
        let handle = self.current().await;

        let documents = match tokio::time::timeout(self.timeout, handle.agent.retrieve(query)).await {
            Ok(Ok(documents)) => documents,
            Ok(Err(e)) => {
                warn!("Document retrieval failed: {}", e);
                return SourceLookup::not_retrieved();
            }
            Err(_) => {
                warn!("Document retrieval timed out after {}s", self.timeout.as_secs());
                return SourceLookup::not_retrieved();
            }
        };

        if documents.is_empty() {
            debug!("No document above the score threshold");
            return SourceLookup::not_retrieved();
        }

        SourceLookup::Found(DocumentSources::from_documents(&documents))
    }

    /// Validate a new credential/model pair with a trial call, then make it
    /// the active handle. On failure the previous handle stays in place.
    pub async fn reconfigure(&self, api_key: &str, model: &str) -> Result<u64> {
        if api_key.trim().is_empty() || model.trim().is_empty() {
            return Err(BotError::Config(
                "API key and model must both be provided".to_string(),
            ));
        }

        let agent = self
            .provider
            .build(api_key, model)
            .map_err(|e| BotError::Config(format!("Failed to build agent: {}", e)))?;

        agent
            .verify()
            .await
            .map_err(|e| BotError::Config(format!("Failed to update API Key and model. Error: {}", e)))?;

        // Generations are assigned under the write guard so they rise in commit order
        let mut current = self.handle.write().await;
        let generation = current.generation + 1;
        *current = Arc::new(AgentHandle {
            agent,
            api_key: api_key.to_string(),
            model: model.to_string(),
            generation,
        });
        drop(current);

        info!(generation, model, "Agent handle swapped");

        Ok(generation)
    }
}

fn ensure_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(BotError::Agent("Query text must not be empty".to_string()));
    }
    Ok(())
}

/// Consumer side of a streaming answer.
///
/// Yields tokens until the producer's `End` marker. Dropping it aborts the
/// producer task.
pub struct TokenStream {
    inner: BoxStream<'static, String>,
    producer: JoinHandle<()>,
}

impl TokenStream {
    fn new(
        mut rx: mpsc::UnboundedReceiver<StreamEvent>,
        producer: JoinHandle<()>,
        delay: Duration,
    ) -> Self {
        let inner = async_stream::stream! {
            let mut forwarded = 0usize;
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Token(token) => {
                        if forwarded > 0 && !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        forwarded += 1;
                        yield token;
                    }
                    StreamEvent::End => break,
                }
            }
        };

        Self {
            inner: inner.boxed(),
            producer,
        }
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, ScriptedAgent, ScriptedProvider, TokenSink};
    use crate::models::{RetrievedDocument, NOT_RETRIEVED};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn relay_with(provider: ScriptedProvider) -> Relay {
        Relay::new(Arc::new(provider), "sk-initial-key-0001", "stub-model", Duration::from_secs(5))
            .unwrap()
    }

    /// Provider returning one fixed agent regardless of credentials.
    struct FixedProvider(Arc<dyn Agent>);

    impl AgentProvider for FixedProvider {
        fn build(&self, _api_key: &str, _model: &str) -> Result<Arc<dyn Agent>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_stream_matches_chat_once() {
        let relay = relay_with(ScriptedProvider::new(tokens(&["Hi", "!", " Few", " words."])));
        let query = "Hello, answer with few words!";

        let streamed: Vec<String> = relay
            .chat_stream(query.to_string(), Duration::ZERO)
            .await
            .unwrap()
            .collect()
            .await;
        let once = relay.chat_once(query).await.unwrap();

        assert!(!streamed.is_empty());
        assert_eq!(streamed.concat(), once);
        assert_eq!(streamed, tokens(&["Hi", "!", " Few", " words."]));
    }

    #[tokio::test]
    async fn test_stream_stops_after_agent_failure() {
        let agent = ScriptedAgent::new("stub", tokens(&["one", "two", "three"])).failing_after(2);
        let relay = Relay::new(
            Arc::new(FixedProvider(Arc::new(agent))),
            "key",
            "stub",
            Duration::from_secs(5),
        )
        .unwrap();

        let streamed: Vec<String> = relay
            .chat_stream("q".to_string(), Duration::ZERO)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(streamed, tokens(&["one", "two"]));
    }

    #[tokio::test]
    async fn test_empty_query_fails_before_streaming() {
        let relay = relay_with(ScriptedProvider::new(tokens(&["x"])));
        assert!(relay.chat_stream("   ".to_string(), Duration::ZERO).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_paces_tokens() {
        let relay = relay_with(ScriptedProvider::new(tokens(&["a", "b", "c"])));
        let started = tokio::time::Instant::now();

        let streamed: Vec<String> = relay
            .chat_stream("q".to_string(), Duration::from_millis(500))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(streamed.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    /// Agent that never finishes and records whether it was dropped.
    struct EndlessAgent {
        cancelled: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Agent for EndlessAgent {
        fn model_name(&self) -> &str {
            "endless"
        }

        async fn stream(&self, _query: &str, sink: &TokenSink) -> Result<()> {
            let _flag = DropFlag(self.cancelled.clone());
            crate::agent::emit(sink, "first")?;
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedDocument>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_abandons_agent_call() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let agent = EndlessAgent {
            cancelled: cancelled.clone(),
        };
        let relay = Relay::new(
            Arc::new(FixedProvider(Arc::new(agent))),
            "key",
            "endless",
            Duration::from_secs(60),
        )
        .unwrap();

        let mut stream = relay.chat_stream("q".to_string(), Duration::ZERO).await.unwrap();
        assert_eq!(stream.next().await.as_deref(), Some("first"));
        drop(stream);

        for _ in 0..100 {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_get_source_sentinel_and_found() {
        let empty = relay_with(ScriptedProvider::new(tokens(&["x"])));
        assert_eq!(
            empty.get_source("anything").await,
            SourceLookup::NotRetrieved(NOT_RETRIEVED.to_string())
        );

        let mut provider = ScriptedProvider::new(tokens(&["x"]));
        provider.documents = vec![
            RetrievedDocument {
                source: "a.jpg".to_string(),
                page_content: "Product Linen Shirt priced 25".to_string(),
                score: 0.5,
            },
            RetrievedDocument {
                source: "b.jpg".to_string(),
                page_content: "Product Wool Coat priced 120".to_string(),
                score: 0.3,
            },
        ];
        let relay = relay_with(provider);

        match relay.get_source("shirt").await {
            SourceLookup::Found(found) => {
                assert_eq!(found.len(), 2);
                assert_eq!(found.names.len(), 2);
                assert_eq!(found.descriptions.len(), 2);
                assert_eq!(found.names[1], "Wool Coat");
            }
            other => panic!("expected sources, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_source_failure_maps_to_sentinel() {
        let agent = ScriptedAgent::new("stub", tokens(&["x"])).failing_after(0);
        let relay = Relay::new(
            Arc::new(FixedProvider(Arc::new(agent))),
            "key",
            "stub",
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(!relay.get_source("q").await.is_found());
    }

    #[tokio::test]
    async fn test_rejected_reconfigure_keeps_previous_handle() {
        let mut provider = ScriptedProvider::new(tokens(&["still", " here"]));
        provider.rejected_keys = vec!["sk-invalid".to_string()];
        let relay = relay_with(provider);
        let before = relay.current().await;

        let result = relay.reconfigure("sk-invalid", "gpt-nonexistent").await;
        assert!(matches!(result, Err(BotError::Config(_))));

        let after = relay.current().await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(relay.current_model().await, "stub-model");
        assert_eq!(relay.chat_once("q").await.unwrap(), "still here");
    }

    #[tokio::test]
    async fn test_reconfigure_swaps_credential_and_model_together() {
        let relay = relay_with(ScriptedProvider::new(tokens(&["ok"])));
        let in_flight = relay.current().await;

        let generation = relay.reconfigure("sk-replacement-key-9999", "gpt-4o").await.unwrap();
        assert_eq!(generation, 1);

        let current = relay.current().await;
        assert_eq!(current.model, "gpt-4o");
        assert_eq!(current.api_key, "sk-replacement-key-9999");
        assert_eq!(relay.current_token().await, "sk-...9999");

        // Requests that captured the old handle keep using it
        assert_eq!(in_flight.model, "stub-model");
        assert_eq!(in_flight.generation, 0);
    }

    #[tokio::test]
    async fn test_reconfigure_requires_both_values() {
        let relay = relay_with(ScriptedProvider::new(tokens(&["ok"])));
        assert!(matches!(relay.reconfigure("", "gpt-4o").await, Err(BotError::Config(_))));
        assert!(matches!(relay.reconfigure("sk-x", " ").await, Err(BotError::Config(_))));
    }

    #[tokio::test]
    async fn test_offline_start_still_validates_swaps() {
        let offline = ScriptedAgent::new("gpt-3.5-turbo", tokens(&["offline"]));
        let mut provider = ScriptedProvider::new(tokens(&["online"]));
        provider.rejected_keys = vec!["sk-definitely-invalid-0000".to_string()];
        let relay = Relay::with_initial_agent(
            Arc::new(provider),
            Arc::new(offline),
            "",
            "gpt-3.5-turbo",
            Duration::from_secs(5),
        );

        let result = relay.reconfigure("sk-definitely-invalid-0000", "gpt-nonexistent").await;
        assert!(matches!(result, Err(BotError::Config(_))));
        assert_eq!(relay.current_model().await, "gpt-3.5-turbo");
        assert_eq!(relay.chat_once("q").await.unwrap(), "offline");

        relay.reconfigure("sk-valid-credential-4242", "gpt-4o").await.unwrap();
        assert_eq!(relay.chat_once("q").await.unwrap(), "online");
    }

    #[tokio::test]
    async fn test_concurrent_swaps_get_increasing_generations() {
        let relay = relay_with(ScriptedProvider::new(tokens(&["ok"])));

        let swaps = (0..8).map(|i| {
            let relay = &relay;
            async move {
                relay
                    .reconfigure(&format!("sk-concurrent-key-{:04}", i), "gpt-4o")
                    .await
                    .unwrap()
            }
        });
        let mut generations = futures::future::join_all(swaps).await;
        generations.sort_unstable();

        assert_eq!(generations, (1..=8).collect::<Vec<u64>>());
        assert_eq!(relay.current().await.generation, 8);
    }
}
