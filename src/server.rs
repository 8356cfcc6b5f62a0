//! HTTP API.
//!
//! Exposes sessions, document attachment, questions, and cost/cache
//! statistics as JSON over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version and model) |
//! | `POST`   | `/sessions/{id}/documents` | Attach `{content, name}` to a session |
//! | `POST`   | `/sessions/{id}/query` | Ask `{query}` in a session |
//! | `GET`    | `/sessions/{id}/document` | Active document summary |
//! | `GET`    | `/sessions/{id}/debug` | Session diagnostics |
//! | `DELETE` | `/sessions/{id}` | Forget a session |
//! | `GET`    | `/stats` | Cache, cost, and session statistics |
//! | `GET`    | `/costs/daily` | Per-day cost totals, most recent first |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `empty_document` (400), `not_found` (404),
//! `no_active_document` (404), `unsupported_document` (415),
//! `budget_exceeded` (429), `model_error` (502), `storage_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use docent_core::cost::DailyCost;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::orchestrator::{DebugSnapshot, DocumentSummary, EngineStats, QueryAnswer, QueryOrchestrator};

/// Shared state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<QueryOrchestrator>,
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Engine::start(config)?;
    let app = router(Arc::clone(engine.orchestrator()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "docent server listening");
    println!("Docent server listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}

/// Build the router around an orchestrator.
pub fn router(orchestrator: Arc<QueryOrchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions/{id}/documents", post(handle_attach))
        .route("/sessions/{id}/query", post(handle_query))
        .route("/sessions/{id}/document", get(handle_active_document))
        .route("/sessions/{id}/debug", get(handle_debug))
        .route("/sessions/{id}", axum::routing::delete(handle_clear_session))
        .route("/stats", get(handle_stats))
        .route("/costs/daily", get(handle_daily_costs))
        .layer(cors)
        .with_state(AppState { orchestrator })
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Transport(_) => StatusCode::BAD_GATEWAY,
            EngineError::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::NoActiveDocument => StatusCode::NOT_FOUND,
            EngineError::EmptyDocument { .. } => StatusCode::BAD_REQUEST,
            EngineError::Extraction(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.orchestrator.stats().model,
    })
}

// ============ POST /sessions/{id}/documents ============

#[derive(Deserialize)]
struct AttachRequest {
    content: String,
    #[serde(default = "default_document_name")]
    name: String,
}

fn default_document_name() -> String {
    "document.txt".to_string()
}

async fn handle_attach(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<AttachRequest>,
) -> Result<Json<DocumentSummary>, AppError> {
    let summary = state
        .orchestrator
        .process_document(&session_id, &req.content, &req.name)
        .await?;
    Ok(Json(summary))
}

// ============ POST /sessions/{id}/query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let answer = state.orchestrator.process_query(&session_id, &req.query).await?;
    Ok(Json(answer))
}

// ============ Session inspection ============

async fn handle_active_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DocumentSummary>, AppError> {
    state
        .orchestrator
        .active_document(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| EngineError::NoActiveDocument.into())
}

async fn handle_debug(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DebugSnapshot>, AppError> {
    state
        .orchestrator
        .debug_snapshot(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("no session with id: {}", session_id)))
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.orchestrator.clear_session(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id: {}", session_id)))
    }
}

// ============ Statistics ============

async fn handle_stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.orchestrator.stats())
}

#[derive(Serialize)]
struct DailyCostsResponse {
    days: Vec<DailyCost>,
}

async fn handle_daily_costs(State(state): State<AppState>) -> Json<DailyCostsResponse> {
    Json(DailyCostsResponse {
        days: state.orchestrator.costs().get_daily_costs(),
    })
}
