//! REST API Server for RaifBot
//!
//! Chat history persistence, streaming and one-shot chat, source lookup and
//! credential hot swap over HTTP.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::{BotError, StoreError};
use crate::history::ChatHistoryStore;
use crate::models::{self, ChatHistoryResponse, Exchange, MessageResponse, SessionId, SourceLookup};
use crate::relay::Relay;

/// =============================
/// Error Translation
/// =============================

/// Boundary error: every failure becomes a status code plus `{"detail"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Keep the store's distinction between a malformed id, a missing
    /// transcript and a backend failure.
    fn from_store(context: &str, err: StoreError) -> Self {
        let message = format!("{}: {}", context, err);
        match err {
            StoreError::InvalidSessionId(_) | StoreError::EmptyExchanges(_) => {
                Self::BadRequest(message)
            }
            StoreError::NotFound(_) => Self::NotFound(message),
            StoreError::Backend { .. } => Self::Internal(message),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();

        if status.is_server_error() {
            error!(status = %status, "{}", detail);
        } else {
            warn!(status = %status, "{}", detail);
        }

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatHistoryStore>,
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatHistoryStore>, relay: Arc<Relay>) -> Self {
        Self { store, relay }
    }
}

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub delay: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyParams {
    pub api_key: String,
    pub model: String,
}

/// Negative, NaN or absurd delays collapse to no pacing.
fn pacing(delay: f64) -> Duration {
    Duration::try_from_secs_f64(delay).unwrap_or(Duration::ZERO)
}

/// =============================
/// Service Endpoints
/// =============================

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "detail": "Welcome to RaifBot API!" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "🤙" }))
}

/// =============================
/// Chat History Endpoints
/// =============================

async fn save_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(history_items): Json<Vec<Exchange>>,
) -> ApiResult<Json<MessageResponse>> {
    let context = "Failed to update/insert chat history";
    let session_id = SessionId::parse(&session_id).map_err(|e| ApiError::internal(format!("{}: {}", context, e)))?;

    let outcome = state
        .store
        .save(&session_id, history_items)
        .await
        .map_err(|e| ApiError::internal(format!("{}: {}", context, e)))?;

    info!(session_id = %session_id, ?outcome, "Chat history saved");
    Ok(Json(MessageResponse::new(outcome.message())))
}

async fn get_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ChatHistoryResponse>> {
    let context = format!("Failed to get chat history for id {}", session_id);
    let session_id = SessionId::parse(&session_id).map_err(|e| ApiError::internal(format!("{}: {}", context, e)))?;

    let chat_history = state
        .store
        .get(&session_id)
        .await
        .map_err(|e| ApiError::internal(format!("{}: {}", context, e)))?;

    Ok(Json(ChatHistoryResponse { chat_history }))
}

async fn delete_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let context = format!("Failed to delete chat history for id {}", session_id);
    let session_id = SessionId::parse(&session_id).map_err(|e| ApiError::from_store(&context, e))?;

    state
        .store
        .delete(&session_id)
        .await
        .map_err(|e| ApiError::from_store(&context, e))?;

    info!(session_id = %session_id, "Chat history deleted");
    Ok(Json(MessageResponse::new("Chat history deleted")))
}

async fn delete_all_chat_histories(
    State(state): State<AppState>,
) -> ApiResult<Json<MessageResponse>> {
    let removed = state
        .store
        .delete_all()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to delete whole chat history: {}", e)))?;

    warn!(removed, "Whole chat history deleted");
    Ok(Json(MessageResponse::new("Whole chat history deleted")))
}

/// =============================
/// Agent Endpoints
/// =============================

async fn update_api_key_and_model(
    State(state): State<AppState>,
    Query(params): Query<UpdateKeyParams>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .relay
        .reconfigure(&params.api_key, &params.model)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(MessageResponse::new(
        "Your API Key and model are updated successfully.",
    )))
}

async fn get_current_model(State(state): State<AppState>) -> Json<MessageResponse> {
    let model = state.relay.current_model().await;
    Json(MessageResponse::new(format!("Current model is {}", model)))
}

async fn get_current_token(State(state): State<AppState>) -> Json<MessageResponse> {
    let token = state.relay.current_token().await;
    Json(MessageResponse::new(format!("Current token is {}", token)))
}

async fn chat_no_stream(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<String>> {
    state
        .relay
        .chat_once(&params.query)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(chat_failure("without streaming", e)))
}

async fn chat(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    Json(query): Json<models::Query>,
) -> ApiResult<Response> {
    let tokens = state
        .relay
        .chat_stream(query.text, pacing(params.delay))
        .await
        .map_err(|e| ApiError::internal(chat_failure("with streaming", e)))?;

    let body = Body::from_stream(tokens.map(Ok::<_, Infallible>));

    Ok(([(header::CONTENT_TYPE, "text/event-stream")], body).into_response())
}

fn chat_failure(mode: &str, e: BotError) -> String {
    format!("Unexpected error during agent text generation {}: {}", mode, e)
}

async fn get_document_source(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Json<SourceLookup> {
    Json(state.relay.get_source(&params.query).await)
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/save_chat_history/:session_id", post(save_chat_history))
        .route("/get_chat_history/:session_id", get(get_chat_history))
        .route("/delete_chat_history/:session_id", delete(delete_chat_history))
        .route("/delete_all_chat_histories", delete(delete_all_chat_histories))
        .route("/update_api_key_and_openai_model/", post(update_api_key_and_model))
        .route("/get_current_model/", get(get_current_model))
        .route("/get_current_token/", get(get_current_token))
        .route("/chat_no_stream", get(chat_no_stream))
        .route("/chat", get(chat))
        .route("/get_document_source/", get(get_document_source))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: AppState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedProvider;
    use crate::history::InMemoryChatHistoryStore;
    use crate::models::RetrievedDocument;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router(provider: ScriptedProvider) -> Router {
        let relay = Relay::new(
            Arc::new(provider),
            "sk-test-credential-1234",
            "stub-model",
            Duration::from_secs(5),
        )
        .unwrap();
        let state = AppState::new(Arc::new(InMemoryChatHistoryStore::new()), Arc::new(relay));
        create_router(state)
    }

    fn scripted() -> ScriptedProvider {
        ScriptedProvider::new(vec!["Hello".to_string(), " there".to_string(), "!".to_string()])
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let router = test_router(scripted());
        let (status, body) = send(&router, empty_request("GET", "/health")).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "🤙");
    }

    #[tokio::test]
    async fn test_chat_history_lifecycle() {
        let router = test_router(scripted());
        let session_id = SessionId::generate();
        let items = serde_json::json!([["Hello", "Hi there!"]]);

        let uri = format!("/save_chat_history/{}", session_id);
        let (status, body) = send(&router, json_request("POST", &uri, items.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let msg: MessageResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "Chat history successfully inserted.");

        let (status, body) = send(&router, json_request("POST", &uri, items)).await;
        assert_eq!(status, StatusCode::OK);
        let msg: MessageResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "Chat history successfully updated.");

        let get_uri = format!("/get_chat_history/{}", session_id);
        let (status, body) = send(&router, empty_request("GET", &get_uri)).await;
        assert_eq!(status, StatusCode::OK);
        let history: ChatHistoryResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            history.chat_history,
            vec![Exchange::new("Hello", "Hi there!"), Exchange::new("Hello", "Hi there!")]
        );

        let (status, _) = send(&router, empty_request("GET", "/get_chat_history/%20")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let delete_uri = format!("/delete_chat_history/{}", session_id);
        let (status, _) = send(&router, empty_request("DELETE", &delete_uri)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&router, empty_request("GET", &get_uri)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.detail.contains("no chat history"));

        let (status, _) = send(&router, empty_request("DELETE", &delete_uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_with_malformed_id_is_bad_request() {
        let router = test_router(scripted());
        let (status, _) = send(&router, empty_request("DELETE", "/delete_chat_history/not-an-id")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_all_chat_histories() {
        let router = test_router(scripted());
        let ids: Vec<SessionId> = (0..2).map(|_| SessionId::generate()).collect();
        for id in &ids {
            let uri = format!("/save_chat_history/{}", id);
            send(&router, json_request("POST", &uri, serde_json::json!([["q", "a"]]))).await;
        }

        let (status, _) = send(&router, empty_request("DELETE", "/delete_all_chat_histories")).await;
        assert_eq!(status, StatusCode::OK);

        for id in &ids {
            let uri = format!("/get_chat_history/{}", id);
            let (status, _) = send(&router, empty_request("GET", &uri)).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[tokio::test]
    async fn test_streaming_and_one_shot_chat_agree() {
        let router = test_router(scripted());

        let request = Request::builder()
            .method("GET")
            .uri("/chat?delay=0")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({ "text": "Hello, answer with few words!" }).to_string(),
            ))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        let streamed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let (status, body) = send(
            &router,
            empty_request("GET", "/chat_no_stream?query=Hello%2C%20answer%20with%20few%20words%21"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let once: String = serde_json::from_slice(&body).unwrap();

        assert_eq!(String::from_utf8(streamed.to_vec()).unwrap(), once);
        assert_eq!(once, "Hello there!");
    }

    #[tokio::test]
    async fn test_empty_chat_query_fails_before_stream() {
        let router = test_router(scripted());
        let (status, _) = send(
            &router,
            json_request("GET", "/chat", serde_json::json!({ "text": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_update_api_key_and_model() {
        let mut provider = scripted();
        provider.rejected_keys = vec!["sk-bad".to_string()];
        let router = test_router(provider);

        let (status, body) = send(
            &router,
            empty_request("POST", "/update_api_key_and_openai_model/?api_key=sk-bad&model=gpt-4o"),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.detail.contains("Failed to update API Key and model"));

        let (_, body) = send(&router, empty_request("GET", "/get_current_model/")).await;
        let msg: MessageResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "Current model is stub-model");

        let (status, _) = send(
            &router,
            empty_request("POST", "/update_api_key_and_openai_model/?api_key=sk-good-credential-5678&model=gpt-4o"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&router, empty_request("GET", "/get_current_model/")).await;
        let msg: MessageResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "Current model is gpt-4o");

        let (_, body) = send(&router, empty_request("GET", "/get_current_token/")).await;
        let msg: MessageResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(msg.message, "Current token is sk-...5678");
    }

    #[tokio::test]
    async fn test_get_document_source() {
        let router = test_router(scripted());
        let (status, body) = send(&router, empty_request("GET", "/get_document_source/?query=hat")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), r#""Not retrieved""#);

        let mut provider = scripted();
        provider.documents = vec![RetrievedDocument {
            source: "hat.jpg".to_string(),
            page_content: "Product Straw Hat priced 15".to_string(),
            score: 0.6,
        }];
        let router = test_router(provider);
        let (_, body) = send(&router, empty_request("GET", "/get_document_source/?query=hat")).await;
        let lookup: SourceLookup = serde_json::from_slice(&body).unwrap();
        match lookup {
            SourceLookup::Found(found) => assert_eq!(found.names, vec!["Straw Hat".to_string()]),
            other => panic!("expected sources, got {:?}", other),
        }
    }

    #[test]
    fn test_pacing_rejects_invalid_delays() {
        assert_eq!(pacing(-1.0), Duration::ZERO);
        assert_eq!(pacing(f64::NAN), Duration::ZERO);
        assert_eq!(pacing(0.25), Duration::from_millis(250));
    }
}
