//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Stream a chat reply as NDJSON |
//! | `POST` | `/query` | Answer a single question |
//! | `POST` | `/refresh_index` | Sync the index with the input directories |
//! | `POST` | `/rebuild_index` | Rebuild from scratch, optionally switching models |
//! | `POST` | `/reset_chat` | Clear the chat history |
//! | `GET`  | `/stats` | Index statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Streaming
//!
//! `/chat` responds with `application/x-ndjson`: one `{"response": token}`
//! line per token, then a single final line,
//! `{"response": full, "sources": [..], "final": true}`, or
//! `{"error": message, "final": true}` if generation failed. Closing the
//! connection stops generation.
//!
//! # Errors
//!
//! Every non-2xx response carries `{"error": "message"}`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends can
//! call the API directly.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::ChatFacade;
use crate::config::ModelOverrides;
use crate::error::NexusError;
use crate::index_store::IndexStats;
use crate::progress::NoProgress;
use crate::query::{AnswerEvent, QueryFacade};
use crate::sync::SyncEngine;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<SyncEngine>,
    query: QueryFacade,
    /// The server keeps one chat session shared by all clients.
    chat: ChatFacade,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            query: QueryFacade::new(engine.clone()),
            chat: ChatFacade::new(engine.clone()),
            engine,
        }
    }
}

/// Build the router with every endpoint and permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/query", post(handle_query))
        .route("/refresh_index", post(handle_refresh))
        .route("/rebuild_index", post(handle_rebuild))
        .route("/reset_chat", post(handle_reset_chat))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `bind` until Ctrl-C, then close the index.
pub async fn run_server(engine: Arc<SyncEngine>, bind: &str) -> anyhow::Result<()> {
    let app = router(AppState::new(engine.clone()));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    println!("NexuSync server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    engine.close().await;
    Ok(())
}

// ============ Error response ============

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<NexusError> for AppError {
    fn from(err: NexusError) -> Self {
        let status = match err {
            NexusError::Configuration(_) | NexusError::EmptyCorpus => StatusCode::BAD_REQUEST,
            NexusError::Generation(_) => StatusCode::BAD_GATEWAY,
            NexusError::Persistence(_) | NexusError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(code = err.code(), "request failed: {}", err);
        AppError {
            status,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

fn ndjson_line(event: AnswerEvent) -> String {
    let value = match event {
        AnswerEvent::Token(token) => json!({ "response": token }),
        AnswerEvent::Final(answer) => match answer.error {
            Some(error) => json!({ "error": error, "final": true }),
            None => json!({
                "response": answer.answer,
                "sources": answer.sources,
                "final": true,
            }),
        },
    };
    format!("{}\n", value)
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let events = state.chat.chat_stream(&req.message).await;
    let lines = futures_util::stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((Ok::<_, Infallible>(ndjson_line(event)), events))
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    sources: Vec<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let answer = state.query.ask(&req.query, req.top_k).await;
    match answer.error {
        Some(error) => Err(AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error,
        }),
        None => Ok(Json(QueryResponse {
            response: answer.answer,
            sources: answer.sources,
        })),
    }
}

// ============ POST /refresh_index ============

#[derive(Serialize)]
struct RefreshResponse {
    status: String,
    upserted: usize,
    deleted: usize,
    unchanged: usize,
    failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn handle_refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, AppError> {
    let report = state.engine.refresh(&NoProgress).await?;
    Ok(Json(RefreshResponse {
        status: "Index refreshed successfully".to_string(),
        upserted: report.upserted(),
        deleted: report.deleted.len(),
        unchanged: report.unchanged,
        failed: report.failed.len(),
        warning: report.mismatch.map(|m| {
            format!(
                "{} documents indexed but {} files on disk",
                m.indexed, m.on_disk
            )
        }),
    }))
}

// ============ POST /rebuild_index ============

#[derive(Serialize)]
struct RebuildResponse {
    status: String,
    indexed: usize,
    failed: usize,
    embedding_model: String,
    llm_model: String,
}

async fn handle_rebuild(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RebuildResponse>, AppError> {
    let overrides: ModelOverrides = if body.iter().all(u8::is_ascii_whitespace) {
        ModelOverrides::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid request body: {}", e)))?
    };

    let report = state.engine.rebuild(&overrides, &NoProgress).await?;
    state.chat.clear_history();

    Ok(Json(RebuildResponse {
        status: "Index rebuilt successfully".to_string(),
        indexed: report.indexed,
        failed: report.failed.len(),
        embedding_model: report.embedding_model,
        llm_model: report.llm_model,
    }))
}

// ============ POST /reset_chat ============

async fn handle_reset_chat(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.chat.clear_history();
    Json(json!({ "status": "Chat history cleared" }))
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    Ok(Json(state.engine.stats().await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Answer;

    #[test]
    fn ndjson_token_and_final_lines() {
        assert_eq!(
            ndjson_line(AnswerEvent::Token("Par".into())),
            "{\"response\":\"Par\"}\n"
        );

        let line = ndjson_line(AnswerEvent::Final(Answer {
            answer: "Paris".into(),
            sources: vec!["/docs/france.txt".into()],
            error: None,
        }));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["final"], true);
        assert_eq!(value["sources"][0], "/docs/france.txt");

        let line = ndjson_line(AnswerEvent::Final(Answer::failed(&NexusError::generation("down"))));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["final"], true);
        assert!(value["error"].as_str().unwrap().contains("down"));
        assert!(value.get("response").is_none());
    }
}
