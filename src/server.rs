//! HTTP front end.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version and scheduler status) |
//! | `POST`   | `/ask` | Answer a query; the body streams as plain text |
//! | `DELETE` | `/sessions/{session}/history` | Forget a session |
//! | `POST`   | `/corpora/{corpus}/actions/{action}` | Run a corpus action; streams text |
//! | `POST`   | `/sync` | Wake the ingestion scheduler |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown corpus: 'jira'" } }
//! ```
//!
//! Error codes: `bad_request` (400, unknown corpus/action/record or empty
//! corpus), `upstream` (502, a model or corpus source failed), `internal` (500).

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::chain::AnswerChain;
use crate::error::Error;
use crate::models::Metadata;
use crate::scheduler::{IngestionScheduler, SchedulerStatus};

#[derive(Clone)]
struct AppState {
    chain: Arc<AnswerChain>,
    scheduler: Arc<IngestionScheduler>,
}

/// Serve on `[server].bind` until `shutdown` resolves.
pub async fn run_server<F>(app: &App, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = app.config.server.bind.clone();
    let router = build_router(app.chain.clone(), app.scheduler.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub fn build_router(chain: Arc<AnswerChain>, scheduler: Arc<IngestionScheduler>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .route("/sessions/{session}/history", delete(handle_clear_history))
        .route("/corpora/{corpus}/actions/{action}", post(handle_action))
        .route("/sync", post(handle_sync))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { chain, scheduler })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = if err.is_client_error() {
            (StatusCode::BAD_REQUEST, "bad_request")
        } else if matches!(err, Error::Upstream(_)) {
            (StatusCode::BAD_GATEWAY, "upstream")
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        };
        if status != StatusCode::BAD_REQUEST {
            tracing::error!(error = %err, "request failed");
        }
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
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

fn text_stream(chunks: BoxStream<'static, String>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks.map(Ok::<_, Infallible>)),
    )
        .into_response()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    scheduler: SchedulerStatus,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        scheduler: state.scheduler.status(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
    #[serde(default)]
    corpus: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Response, AppError> {
    let chunks = state
        .chain
        .ask(&req.query, req.corpus.as_deref(), req.session.as_deref())
        .await?;
    Ok(text_stream(chunks))
}

// ============ DELETE /sessions/{session}/history ============

async fn handle_clear_history(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<StatusCode, AppError> {
    state.chain.clear_history(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /corpora/{corpus}/actions/{action} ============

async fn handle_action(
    State(state): State<AppState>,
    Path((corpus, action)): Path<(String, String)>,
    Json(data): Json<Metadata>,
) -> Result<Response, AppError> {
    let chunks = state.chain.custom_action(&corpus, &action, &data).await?;
    Ok(text_stream(chunks))
}

// ============ POST /sync ============

async fn handle_sync(State(state): State<AppState>) -> (StatusCode, Json<SchedulerStatus>) {
    state.scheduler.trigger();
    (StatusCode::ACCEPTED, Json(state.scheduler.status()))
}
