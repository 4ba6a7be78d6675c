//! Read-only JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/letters` | All stored letters, newest first |
//! | `GET`  | `/letters/{id}` | One letter with products and matches |
//! | `POST` | `/candidates` | Ranked catalogue candidates for a product, no LLM |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "product has no searchable fields" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser dashboards can
//! read the API directly.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::models::{Letter, LetterProduct};
use crate::pipeline::{self, CandidateReport};
use crate::store::{self, LetterDetail};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        Self {
            config: Arc::new(config),
            pool,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/letters", get(handle_list_letters))
        .route("/letters/{id}", get(handle_get_letter))
        .route("/candidates", post(handle_candidates))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let app = router(AppState::new(config.clone(), pool));

    println!("SE Letters API listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
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

// ============ GET /letters ============

#[derive(Serialize)]
struct LetterListResponse {
    letters: Vec<Letter>,
}

async fn handle_list_letters(
    State(state): State<AppState>,
) -> Result<Json<LetterListResponse>, AppError> {
    let letters = store::list_letters(&state.pool).await?;
    Ok(Json(LetterListResponse { letters }))
}

// ============ GET /letters/{id} ============

async fn handle_get_letter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LetterDetail>, AppError> {
    store::get_letter(&state.pool, &id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("letter not found: {}", id)))
}

// ============ POST /candidates ============

#[derive(Deserialize)]
struct CandidatesRequest {
    product: LetterProduct,
    #[serde(default)]
    limit: Option<usize>,
}

/// Discovery and scoring for an ad-hoc product. The LLM is never called.
async fn handle_candidates(
    State(state): State<AppState>,
    Json(req): Json<CandidatesRequest>,
) -> Result<Json<CandidateReport>, AppError> {
    if !req.product.is_searchable() {
        return Err(bad_request("product has no searchable fields"));
    }
    let mut report =
        pipeline::discover_candidates(&state.pool, &state.config.matching, &req.product).await?;
    if let Some(limit) = req.limit {
        report.candidates.truncate(limit);
    }
    Ok(Json(report))
}
