//! Retrieval HTTP service.
//!
//! Two stateless read endpoints layered directly over the
//! [`KnowledgeEngine`]: no caching, no rate limiting, no authentication.
//! The only shared state is the engine handle, so concurrent requests never
//! interfere with each other here.
//!
//! # Endpoints
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `POST` | `/search` | `{ query, relevance = 0.5, limit = 10 }` | JSON array of engine results |
//! | `POST` | `/ask` | `{ query, relevance = 0.5 }` | `text/plain` answer |
//! | `GET`  | `/health` | | `{ status, version }` |
//!
//! # Error Contract
//!
//! Engine failures return `502` with
//! `{ "error": { "code": "engine_error", "message": "..." } }`. Malformed
//! request bodies are rejected by the JSON extractor before reaching the
//! engine.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::engine::KnowledgeEngine;
use crate::models::{AskRequest, SearchRequest};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<dyn KnowledgeEngine>,
}

/// Build the service router over `engine`.
pub fn router(engine: Arc<dyn KnowledgeEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, engine: Arc<dyn KnowledgeEngine>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    serve(listener, engine).await
}

/// Serve on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    engine: Arc<dyn KnowledgeEngine>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    println!("Retrieval service listening on http://{}", addr);
    tracing::info!(%addr, "retrieval service started");

    axum::serve(listener, router(engine)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn engine_error(err: anyhow::Error) -> AppError {
    tracing::warn!(error = %err, "knowledge engine request failed");
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "engine_error".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ POST /search ============

/// Forwards query, relevance floor and limit unchanged; the engine's result
/// objects are returned as-is, capped at `limit`.
async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<Value>>, AppError> {
    let mut results = state
        .engine
        .search(&req.query, req.relevance, req.limit)
        .await
        .map_err(engine_error)?;
    results.truncate(req.limit);
    Ok(Json(results))
}

// ============ POST /ask ============

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Response, AppError> {
    let answer = state
        .engine
        .ask(&req.query, req.relevance)
        .await
        .map_err(engine_error)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], answer).into_response())
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
