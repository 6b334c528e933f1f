//! HTTP API gateway for Pagewise.
//!
//! Exposes a health check and the v1 session API: create a chat session,
//! send messages (JSON or SSE), adjust sampling settings and toggle the
//! sources of each answer.
//!
//! Built on Axum. Every session lives behind its own async mutex, so turns
//! of one session run one at a time while different sessions proceed
//! concurrently over the shared index.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header, request::Parts};
use axum::{Router, response::Json, routing::get};
use chrono::{DateTime, Utc};
use pagewise_pipeline::{ChatSession, SessionFactory};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

/// Request bodies are small JSON documents.
const BODY_LIMIT: usize = 64 * 1024;

/// One live session and when it was opened.
pub struct SessionSlot {
    pub session: Arc<Mutex<ChatSession>>,
    pub created_at: DateTime<Utc>,
}

/// Shared application state for the gateway.
pub struct GatewayState {
    pub factory: SessionFactory,
    pub sessions: RwLock<HashMap<String, SessionSlot>>,
    /// Oldest sessions are evicted beyond this count
    pub max_sessions: usize,
    pub start_time: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(factory: SessionFactory, max_sessions: usize) -> Self {
        Self {
            factory,
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            start_time: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the full router: `/health` plus the v1 API under `/v1`.
///
/// Layers: request body limit, CORS restricted to local origins, HTTP
/// trace logging.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(is_local_origin))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api::v1_router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn is_local_origin(origin: &HeaderValue, _parts: &Parts) -> bool {
    origin.to_str().is_ok_and(|o| {
        ["http://localhost", "http://127.0.0.1"]
            .iter()
            .any(|prefix| o == *prefix || o.starts_with(&format!("{prefix}:")))
    })
}

/// Serve the gateway until the process is stopped.
pub async fn start(
    config: &pagewise_config::GatewayConfig,
    factory: SessionFactory,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(GatewayState::new(factory, config.max_sessions));
    let app = build_router(state);

    info!(addr = %addr, max_sessions = config.max_sessions, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
