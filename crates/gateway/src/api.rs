//! HTTP API v1: chat sessions over the shared document index.
//!
//! Endpoints:
//!
//! - `POST   /v1/sessions`                              create a session
//! - `GET    /v1/sessions/{id}`                         history, settings, sources
//! - `DELETE /v1/sessions/{id}`                         end a session
//! - `POST   /v1/sessions/{id}/messages`                send a message
//! - `POST   /v1/sessions/{id}/messages/stream`         send a message, SSE reply
//! - `PUT    /v1/sessions/{id}/settings`                update sampling settings
//! - `POST   /v1/sessions/{id}/sources/{index}/toggle`  show/hide an answer's sources

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use pagewise_core::message::ChatTurn;
use pagewise_core::params::LlmParameters;
use pagewise_pipeline::{ChatSession, PipelineStreamEvent, PipelineVariant, ReplyStatus};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::{SessionSlot, SharedState};

/// Build the v1 API router. Nested under "/v1" by [`crate::build_router`].
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/sessions", post(create_session_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/{id}/messages", post(message_handler))
        .route("/sessions/{id}/messages/stream", post(message_stream_handler))
        .route("/sessions/{id}/settings", put(settings_handler))
        .route(
            "/sessions/{id}/sources/{index}/toggle",
            post(toggle_sources_handler),
        )
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// "basic" or "upgraded"; the configured variant when absent
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreatedResponse {
    pub session_id: String,
    pub variant: PipelineVariant,
    pub welcome_message: String,
    pub settings: SettingsDto,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingsDto {
    pub temperature: f64,
    pub top_k: f64,
    pub top_p: f64,
}

impl From<LlmParameters> for SettingsDto {
    fn from(p: LlmParameters) -> Self {
        Self {
            temperature: p.temperature() as f64,
            top_k: p.top_k() as f64,
            top_p: p.top_p() as f64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesSummary {
    pub index: usize,
    pub shown: bool,
    /// 1-based pages of the chunks behind the answer
    pub pages: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub variant: PipelineVariant,
    pub created_at: DateTime<Utc>,
    pub settings: SettingsDto,
    pub turns: Vec<ChatTurn>,
    pub sources: Vec<SourcesSummary>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub session_id: String,
    pub reply: String,
    pub status: ReplyStatus,
    pub sources_index: Option<usize>,
    pub retrieval_query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub index: usize,
    pub shown: bool,
    /// Rendered sources block while shown
    pub sources: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn session_not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("Session not found: {id}"))
}

async fn find_session(state: &SharedState, id: &str) -> Result<Arc<Mutex<ChatSession>>, ApiError> {
    state
        .sessions
        .read()
        .await
        .get(id)
        .map(|slot| Arc::clone(&slot.session))
        .ok_or_else(|| session_not_found(id))
}

fn check_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message must not be empty"));
    }
    Ok(())
}

// ── Sessions ──────────────────────────────────────────────────────────────

/// `POST /v1/sessions`. The body is optional.
async fn create_session_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionCreatedResponse>), ApiError> {
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?
    };

    let variant = match request.variant {
        Some(v) => v
            .parse::<PipelineVariant>()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => state.factory.default_variant(),
    };

    let session = state.factory.create_with_variant(variant).map_err(|e| {
        error!(error = %e, "Failed to build session pipeline");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let id = session.id().to_string();
    let response = SessionCreatedResponse {
        session_id: id.clone(),
        variant,
        welcome_message: session.welcome_message().to_string(),
        settings: session.settings().into(),
    };

    let mut sessions = state.sessions.write().await;
    // Evict oldest session if at capacity
    if sessions.len() >= state.max_sessions {
        if let Some(oldest) = sessions
            .iter()
            .min_by_key(|(_, slot)| slot.created_at)
            .map(|(k, _)| k.clone())
        {
            sessions.remove(&oldest);
            info!(session = %oldest, "Evicted oldest session");
        }
    }
    sessions.insert(
        id.clone(),
        SessionSlot {
            created_at: session.created_at(),
            session: Arc::new(Mutex::new(session)),
        },
    );

    info!(session = %id, variant = %variant, "Session created");
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = find_session(&state, &id).await?;
    let session = session.lock().await;

    Ok(Json(SessionResponse {
        session_id: id,
        variant: session.variant(),
        created_at: session.created_at(),
        settings: session.settings().into(),
        turns: session.history().turns().to_vec(),
        sources: session
            .sources()
            .iter()
            .enumerate()
            .map(|(index, entry)| SourcesSummary {
                index,
                shown: entry.shown,
                pages: entry.chunks.iter().map(|c| c.display_page()).collect(),
            })
            .collect(),
    }))
}

/// Ending a session drops its history.
async fn delete_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(session = %id, "Session ended");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(session_not_found(&id)),
    }
}

// ── Messages ──────────────────────────────────────────────────────────────

async fn message_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    check_message(&payload.message)?;
    let session = find_session(&state, &id).await?;
    let mut session = session.lock().await;

    let reply = session.send_message(&payload.message).await.map_err(|e| {
        error!(session = %id, error = %e, "Turn failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(MessageResponse {
        session_id: id,
        reply: reply.content,
        status: reply.status,
        sources_index: reply.sources_index,
        retrieval_query: reply.retrieval_query,
    }))
}

/// `POST /v1/sessions/{id}/messages/stream`: the answer as SSE `chunk`
/// events, then one `done` event.
async fn message_stream_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<MessageRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    check_message(&payload.message)?;
    let session = find_session(&state, &id).await?;

    let (tx, rx) = mpsc::channel::<PipelineStreamEvent>(64);
    tokio::spawn(async move {
        let mut session = session.lock().await;
        if let Err(e) = session.send_message_streaming(&payload.message, &tx).await {
            error!(session = %id, error = %e, "Streaming turn failed");
            let _ = tx
                .send(PipelineStreamEvent::Error {
                    message: e.to_string(),
                })
                .await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}

// ── Settings & sources ────────────────────────────────────────────────────

/// Values are validated now and take effect at the next message.
async fn settings_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<SettingsDto>,
) -> Result<Json<SettingsDto>, ApiError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.lock().await;

    match session.update_settings(payload.temperature, payload.top_k, payload.top_p) {
        Ok(params) => Ok(Json(params.into())),
        Err(e) => {
            warn!(session = %id, error = %e, "Settings rejected");
            Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Settings rejected: {e}"),
            ))
        }
    }
}

async fn toggle_sources_handler(
    State(state): State<SharedState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let session = find_session(&state, &id).await?;
    let mut session = session.lock().await;

    let shown = session.toggle_sources(index).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("No sources entry {index} in session {id}"),
        )
    })?;
    let sources = shown
        .then(|| session.sources_entry(index).map(|entry| entry.render()))
        .flatten();

    Ok(Json(ToggleResponse {
        index,
        shown,
        sources,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GatewayState, build_router};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pagewise_core::document::RetrievedChunk;
    use pagewise_core::error::{ProviderError, RetrievalError};
    use pagewise_core::filter::MetadataFilter;
    use pagewise_core::message::{Message, TurnRole};
    use pagewise_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use pagewise_core::store::VectorStore;
    use pagewise_pipeline::{FALLBACK_MESSAGE, PipelineConfig, SessionFactory, WELCOME_MESSAGE};
    use tower::ServiceExt;

    /// Answers every request with the same text.
    struct MockProvider {
        response_text: String,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(&self.response_text),
                usage: None,
                model: "mock-model".into(),
                metadata: serde_json::Map::new(),
            })
        }
    }

    /// Returns the same two chunks for every search.
    struct FixedStore;

    #[async_trait]
    impl VectorStore for FixedStore {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(
            &self,
            _query: &str,
            k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
            let chunks = [(0, "Regulation (EU) 2017/745 on medical devices"), (4, "Scope of the regulation")];
            Ok(chunks
                .iter()
                .take(k)
                .enumerate()
                .map(|(rank, (page, content))| RetrievedChunk {
                    content: content.to_string(),
                    page: *page,
                    start_index: 0,
                    source: "document.pdf".into(),
                    rank,
                    score: 0.9,
                })
                .collect())
        }

        async fn count(&self) -> Result<usize, RetrievalError> {
            Ok(2)
        }
    }

    fn test_state_with(answer: &str, max_sessions: usize) -> SharedState {
        let provider = Arc::new(MockProvider {
            response_text: answer.into(),
        });
        let factory = SessionFactory::new(
            Arc::new(FixedStore),
            provider,
            "mock-model",
            PipelineConfig::basic(),
        );
        Arc::new(GatewayState::new(factory, max_sessions))
    }

    fn test_state() -> SharedState {
        test_state_with("The MDR is defined on page 1.", 10)
    }

    async fn send(state: &SharedState, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_session(state: &SharedState) -> String {
        let req = Request::builder()
            .method("POST")
            .uri("/v1/sessions")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(state, req).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: SessionCreatedResponse = serde_json::from_slice(&body).unwrap();
        created.session_id
    }

    async fn post_message(state: &SharedState, id: &str, message: &str) -> MessageResponse {
        let req = json_request(
            "POST",
            &format!("/v1/sessions/{id}/messages"),
            serde_json::json!({ "message": message }),
        );
        let (status, body) = send(state, req).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&test_state(), req).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn new_session_starts_with_welcome_and_defaults() {
        let state = test_state();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/sessions")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::CREATED);

        let created: SessionCreatedResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.welcome_message, WELCOME_MESSAGE);
        assert_eq!(created.variant, PipelineVariant::Basic);
        assert_eq!(created.settings.top_k, 10.0);
        assert!((created.settings.top_p - 0.9).abs() < 1e-6);
        assert_eq!(created.settings.temperature, 1.0);
    }

    #[tokio::test]
    async fn session_variant_can_be_chosen() {
        let state = test_state();
        let req = json_request("POST", "/v1/sessions", serde_json::json!({ "variant": "upgraded" }));
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::CREATED);
        let created: SessionCreatedResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(created.variant, PipelineVariant::Upgraded);

        let req = json_request("POST", "/v1/sessions", serde_json::json!({ "variant": "fancy" }));
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let req = Request::builder()
            .uri("/v1/sessions/nonexistent")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&test_state(), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn message_is_answered_and_recorded() {
        let state = test_state();
        let id = create_session(&state).await;

        let reply = post_message(&state, &id, "What is the medical devices regulation?").await;
        assert_eq!(reply.reply, "The MDR is defined on page 1.");
        assert_eq!(reply.status, ReplyStatus::Answered);
        assert_eq!(reply.sources_index, Some(0));

        let req = Request::builder()
            .uri(format!("/v1/sessions/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        let view: SessionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(view.turns.len(), 2);
        assert_eq!(view.turns[0].role, TurnRole::Human);
        assert_eq!(view.sources[0].pages, vec![1, 5]);
        assert!(!view.sources[0].shown);
    }

    #[tokio::test]
    async fn empty_answer_returns_fallback() {
        let state = test_state_with("", 10);
        let id = create_session(&state).await;
        let reply = post_message(&state, &id, "What is the MDR?").await;
        assert_eq!(reply.reply, FALLBACK_MESSAGE);
        assert_eq!(reply.status, ReplyStatus::EmptyGeneration);
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let state = test_state();
        let id = create_session(&state).await;
        let req = json_request(
            "POST",
            &format!("/v1/sessions/{id}/messages"),
            serde_json::json!({ "message": "   " }),
        );
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settings_are_validated() {
        let state = test_state();
        let id = create_session(&state).await;
        let uri = format!("/v1/sessions/{id}/settings");

        let ok = json_request("PUT", &uri, serde_json::json!({ "temperature": 0.3, "top_k": 20, "top_p": 0.5 }));
        let (status, body) = send(&state, ok).await;
        assert_eq!(status, StatusCode::OK);
        let settings: SettingsDto = serde_json::from_slice(&body).unwrap();
        assert_eq!(settings.top_k, 20.0);

        let bad = json_request("PUT", &uri, serde_json::json!({ "temperature": -1.0, "top_k": 5, "top_p": 0.85 }));
        let (status, body) = send(&state, bad).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.starts_with("Settings rejected"));

        let req = Request::builder().uri(format!("/v1/sessions/{id}")).body(Body::empty()).unwrap();
        let (_, body) = send(&state, req).await;
        let view: SessionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(view.settings.top_k, 20.0);
    }

    #[tokio::test]
    async fn toggling_sources_twice_hides_them_again() {
        let state = test_state();
        let id = create_session(&state).await;
        post_message(&state, &id, "What is the MDR?").await;
        let uri = format!("/v1/sessions/{id}/sources/0/toggle");

        let (status, body) = send(&state, json_request("POST", &uri, serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let shown: ToggleResponse = serde_json::from_slice(&body).unwrap();
        assert!(shown.shown);
        let rendered = shown.sources.unwrap();
        assert!(rendered.contains("**Sources**"));
        assert!(rendered.contains("- ***Page 1**: \"Regulation (EU) 2017/745 on medical devices\"*"));

        let (_, body) = send(&state, json_request("POST", &uri, serde_json::json!({}))).await;
        let hidden: ToggleResponse = serde_json::from_slice(&body).unwrap();
        assert!(!hidden.shown);
        assert!(hidden.sources.is_none());

        let missing = format!("/v1/sessions/{id}/sources/3/toggle");
        let (status, _) = send(&state, json_request("POST", &missing, serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let state = test_state();
        let id = create_session(&state).await;

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/v1/sessions/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(send(&state, delete()).await.0, StatusCode::NO_CONTENT);
        assert_eq!(send(&state, delete()).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oldest_session_is_evicted_at_capacity() {
        let state = test_state_with("ok", 2);
        let first = create_session(&state).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = create_session(&state).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let third = create_session(&state).await;

        let sessions = state.sessions.read().await;
        assert_eq!(sessions.len(), 2);
        assert!(!sessions.contains_key(&first));
        assert!(sessions.contains_key(&second));
        assert!(sessions.contains_key(&third));
    }

    #[tokio::test]
    async fn stream_emits_chunks_then_done() {
        let state = test_state();
        let id = create_session(&state).await;
        let req = json_request(
            "POST",
            &format!("/v1/sessions/{id}/messages/stream"),
            serde_json::json!({ "message": "What is the MDR?" }),
        );
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);

        let text = String::from_utf8(body).unwrap();
        let chunk_at = text.find("event: chunk").unwrap();
        let done_at = text.find("event: done").unwrap();
        assert!(chunk_at < done_at);
        assert!(text.contains("The MDR is defined on page 1."));
        assert!(text.contains(r#""sources_index":0"#));

        let session = find_session(&state, &id).await.unwrap();
        let session = session.lock().await;
        assert_eq!(session.history().turns()[1].content, "The MDR is defined on page 1.");
    }
}
