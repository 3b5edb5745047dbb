//! HTTP client for the RaifBot API

use crate::error::BotError;
use crate::models::{ChatHistoryResponse, Exchange, MessageResponse, Query, SessionId, SourceLookup};
use crate::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// `endpoint` is `host:port`, optionally with a scheme.
    pub fn new(client: Client, endpoint: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{}", endpoint)
        };
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn save_chat_history(
        &self,
        session_id: &SessionId,
        exchanges: &[Exchange],
    ) -> Result<MessageResponse> {
        let response = self
            .client
            .post(format!("{}/save_chat_history/{}", self.base_url, session_id))
            .json(exchanges)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }

    pub async fn get_chat_history(&self, session_id: &SessionId) -> Result<Vec<Exchange>> {
        let response = self
            .client
            .get(format!("{}/get_chat_history/{}", self.base_url, session_id))
            .send()
            .await?;

        let body: ChatHistoryResponse = ensure_success(response).await?.json().await?;
        Ok(body.chat_history)
    }

    pub async fn delete_chat_history(&self, session_id: &SessionId) -> Result<MessageResponse> {
        let response = self
            .client
            .delete(format!("{}/delete_chat_history/{}", self.base_url, session_id))
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }

    /// Stream the answer to `text` as UTF-8 chunks in arrival order.
    pub async fn chat_stream(&self, text: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self
            .client
            .get(format!("{}/chat", self.base_url))
            .timeout(CHAT_TIMEOUT)
            .json(&Query {
                text: text.to_string(),
            })
            .send()
            .await?;

        let mut bytes = ensure_success(response).await?.bytes_stream();

        let stream = async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        pending.extend_from_slice(&chunk);
                        let text = take_utf8(&mut pending);
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(BotError::from(e));
                        return;
                    }
                }
            }
            if !pending.is_empty() {
                yield Ok(String::from_utf8_lossy(&pending).into_owned());
            }
        };

        Ok(stream.boxed())
    }

    pub async fn get_source(&self, query: &str) -> Result<SourceLookup> {
        let response = self
            .client
            .get(format!("{}/get_document_source/", self.base_url))
            .query(&[("query", query)])
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body);

    debug!(status = status.as_u16(), "API request failed: {}", detail);
    Err(BotError::Remote {
        status: status.as_u16(),
        detail,
    })
}

/// Drain everything up to the last complete character of `pending`,
/// leaving a split multi-byte character for the next chunk. Invalid bytes
/// become U+FFFD.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let rest = pending.split_off(pending.len() - incomplete_tail(pending));
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

/// Length of a trailing, still incomplete UTF-8 sequence (0 to 3 bytes).
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    (start..bytes.len())
        .find(|&i| {
            matches!(std::str::from_utf8(&bytes[i..]), Err(e) if e.valid_up_to() == 0 && e.error_len().is_none())
        })
        .map_or(0, |i| bytes.len() - i)
}
