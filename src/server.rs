//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Run the pipeline for `{ "query": "..." }` |
//! | `POST` | `/api/reindex` | Rebuild the knowledge index |
//! | `POST` | `/api/reset` | Delete the index output directory |
//! | `GET`  | `/api/graph` | Node/link view of the indexed graph |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! Malformed JSON bodies are reported as `bad_request` in the same envelope.
//!
//! All origins, methods, and headers are permitted so the browser UI can be
//! served from a different port.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::graph::GraphView;
use crate::pipeline::{Pipeline, QueryOutcome};
use crate::reindex::{reset_index, run_reindex, ReindexReport, ResetReport};
use crate::store::EvidenceStore;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
}

/// Builds the router. Separate from [`run_server`] so callers can supply a
/// pipeline with their own backends.
///
/// # Arguments
///
/// - `config` is read by the reindex, reset and graph handlers.
/// - `pipeline` answers `/api/query` and is shared by all requests.
pub fn router(config: Arc<Config>, pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/reindex", post(handle_reindex))
        .route("/api/reset", post(handle_reset))
        .route("/api/graph", get(handle_graph))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { config, pipeline })
}

/// Binds to `[server].bind` and serves until the process is terminated.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server stops
/// with an I/O failure.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pipeline = Arc::new(Pipeline::from_config(config));
    let app = router(Arc::new(config.clone()), pipeline);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
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

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutcome>, AppError> {
    let Json(req) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let query = req.query.trim();
    if query.is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let outcome = state.pipeline.run(query).await.map_err(|e| {
        tracing::error!(error = %e, "pipeline state violation");
        internal(e.to_string())
    })?;
    Ok(Json(outcome))
}

// ============ POST /api/reindex ============

async fn handle_reindex(State(state): State<AppState>) -> Result<Json<ReindexReport>, AppError> {
    run_reindex(&state.config)
        .await
        .map(Json)
        .map_err(|e| internal(format!("reindex failed: {}", e)))
}

// ============ POST /api/reset ============

async fn handle_reset(State(state): State<AppState>) -> Result<Json<ResetReport>, AppError> {
    reset_index(&state.config).await.map(Json).map_err(|e| {
        tracing::error!(error = %e, "reset failed");
        internal(format!("reset failed: {:#}", e))
    })
}

// ============ GET /api/graph ============

async fn handle_graph(State(state): State<AppState>) -> Result<Json<GraphView>, AppError> {
    let dir = state.config.index.output_dir();
    let store = tokio::task::spawn_blocking(move || EvidenceStore::open(&dir))
        .await
        .map_err(|e| internal(e.to_string()))?
        .map_err(|e| {
            if e.is_store_missing() {
                not_found(e.to_string())
            } else {
                internal(e.to_string())
            }
        })?;
    Ok(Json(GraphView::from_store(&store)))
}
