//! # API REST
//!
//! The Git smart HTTP surface for anchorgit.
//!
//! Handles:
//! - `GET /{repo}/info/refs?service=...` — reference advertisement
//! - `POST /{repo}/git-upload-pack` — fetch negotiation
//! - `POST /{repo}/git-receive-pack` — push (triggers anchoring)
//! - `GET /health` — liveness
//!
//! Unsupported `service` values are refused with 403; every other handler
//! error surfaces as a 500 carrying the error text. Protocol bodies are
//! opaque bytes; all Git semantics live in `anchorgit-core`.

#![warn(rust_2018_idioms)]

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use anchorgit_core::{GitError, GitService, SessionKind};

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: GitService,
}

impl AppState {
    pub fn new(service: GitService) -> Self {
        Self { service }
    }
}

/// Build the router over the hosting service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/:repo/info/refs", get(info_refs))
        .route("/:repo/git-upload-pack", post(git_upload_pack))
        .route("/:repo/git-receive-pack", post(git_receive_pack))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "anchorgit is alive"
}

#[derive(Deserialize)]
struct InfoRefsQuery {
    #[serde(default)]
    service: String,
}

async fn info_refs(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<InfoRefsQuery>,
) -> Response {
    let Ok(kind) = SessionKind::from_service_str(&query.service) else {
        return (StatusCode::FORBIDDEN, "only smart git").into_response();
    };

    match state.service.info_refs(&repo, kind).await {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                format!("application/x-{kind}-advertisement"),
            )],
            body,
        )
            .into_response(),
        Err(e) => error_response(&repo, "info/refs", e),
    }
}

async fn git_upload_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Response {
    match state.service.upload_pack(&repo, body.to_vec()).await {
        Ok(response) => (
            [(
                header::CONTENT_TYPE,
                "application/x-git-upload-pack-result",
            )],
            response,
        )
            .into_response(),
        Err(e) => error_response(&repo, "git-upload-pack", e),
    }
}

async fn git_receive_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    body: Bytes,
) -> Response {
    match state.service.receive_pack(&repo, body.to_vec()).await {
        Ok(response) => (
            [(
                header::CONTENT_TYPE,
                "application/x-git-receive-pack-result",
            )],
            response,
        )
            .into_response(),
        Err(e) => error_response(&repo, "git-receive-pack", e),
    }
}

fn error_response(repo: &str, operation: &str, e: GitError) -> Response {
    tracing::error!(repo, operation, error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}
