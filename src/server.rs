//! JSON HTTP API over a shared [`RagEngine`].
//!
//! # Endpoints
//!
//! | Method | Path | Body | Description |
//! |--------|------|------|-------------|
//! | `POST` | `/ask` | `{session_id?, query}` | Answer within a session; a missing id starts a new one |
//! | `POST` | `/generate` | `{query, session_id?}` | Answer, returning only `{response}` |
//! | `POST` | `/reset` | `{session_id}` | Clear a session's history |
//! | `POST` | `/search` | `{query, k?, strategy?}` | Retrieval only |
//! | `POST` | `/index/rebuild` | none | Re-embed all documents |
//! | `GET`  | `/health` | none | Status, version, passage count |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty", "retryable": false } }
//! ```
//!
//! Status codes: `bad_request` 400, `timeout` 504, `embedding_failure` and
//! `generation_failure` 502, everything else 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser chat front
//! ends can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use pdf_rag_core::error::RagError;

use crate::engine::{AskResponse, RagEngine, SourceRef};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    engine: Arc<RagEngine>,
}

/// Serve the API on `bind_addr` until the process is terminated.
pub async fn run_server(engine: Arc<RagEngine>, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(engine);

    tracing::info!(%bind_addr, "HTTP server listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router; exposed so tests can drive it without a socket.
pub fn router(engine: Arc<RagEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/generate", post(handle_generate))
        .route("/reset", post(handle_reset))
        .route("/search", post(handle_search))
        .route("/index/rebuild", post(handle_rebuild))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"timeout"`).
    code: String,
    message: String,
    retryable: bool,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retryable: bool,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RagError::Embedding(_) | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                retryable: self.retryable,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    passages: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let info = state.engine.collection_info().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        passages: info.passage_count,
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    #[serde(default)]
    session_id: Option<String>,
    query: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let session_id = req
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let response = state.engine.ask(&session_id, &req.query).await?;
    Ok(Json(response))
}

// ============ POST /generate ============

#[derive(Deserialize)]
struct GenerateRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct GenerateResponse {
    response: String,
}

/// Single-shot answer with only the text returned.
async fn handle_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let answer = match req.session_id.as_deref() {
        Some(id) => state.engine.ask(id, &req.query).await?,
        None => state.engine.ask_once(&req.query).await?,
    };
    Ok(Json(GenerateResponse {
        response: answer.answer,
    }))
}

// ============ POST /reset ============

#[derive(Deserialize)]
struct ResetRequest {
    session_id: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
}

async fn handle_reset(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    state.engine.reset(&req.session_id).await?;
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    strategy: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SourceRef>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = state
        .engine
        .search(&req.query, req.k, req.strategy.as_deref())
        .await?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /index/rebuild ============

#[derive(Serialize)]
struct RebuildResponse {
    passages: usize,
    documents: usize,
}

async fn handle_rebuild(State(state): State<AppState>) -> Result<Json<RebuildResponse>, AppError> {
    let info = state.engine.rebuild().await?;
    Ok(Json(RebuildResponse {
        passages: info.passage_count,
        documents: info.document_count,
    }))
}
