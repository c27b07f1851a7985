// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Producer side: POST a chat envelope for a session, receive the upstream
// stream back while it is analysed. Consumer side: poll, peek, inspect and
// clear session queues, and look up tool-call names.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use tokio_stream::StreamExt;

use crate::decorate::{GraphLookup, ResultDecorator};
use crate::names::CallNameIndex;
use crate::session::SessionRegistry;
use crate::stream::{PipelineDeps, SessionOutcome, StreamTap};
use crate::upstream::UpstreamClient;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session id is blank")]
    BlankSessionId,

    #[error("request body is empty")]
    EmptyBody,

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("no tool call recorded for id {0}")]
    UnknownToolCall(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BlankSessionId | ApiError::EmptyBody | ApiError::MalformedJson(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::UnknownToolCall(_) => StatusCode::NOT_FOUND,
        };
        let public_message = match &self {
            ApiError::MalformedJson(_) => "request body is not valid JSON".to_string(),
            other => other.to_string(),
        };
        (status, public_message).into_response()
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub tap: Arc<StreamTap>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub decorator: Arc<ResultDecorator>,
}

impl AppState {
    pub fn new(
        deps: PipelineDeps,
        upstream: Arc<dyn UpstreamClient>,
        graph: Option<Arc<dyn GraphLookup>>,
    ) -> Self {
        let decorator = Arc::new(ResultDecorator::new(deps.names.clone(), graph));
        Self {
            tap: Arc::new(StreamTap::new(deps)),
            upstream,
            decorator,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.tap.deps().registry
    }

    pub fn names(&self) -> &Arc<CallNameIndex> {
        &self.tap.deps().names
    }
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub exists: bool,
    pub size: usize,
    pub outcome: Option<SessionOutcome>,
}

#[derive(Debug, Serialize)]
pub struct ClearedView {
    pub session_id: String,
    pub cleared: usize,
}

fn validate_session_id(session_id: String) -> Result<String, ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::BlankSessionId);
    }
    Ok(session_id)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /v1/heartbeat -> 200 OK
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// POST /v1/sessions/:session_id/stream
///
/// The body is forwarded to the upstream as-is. The response is the upstream
/// stream, byte for byte, plus an error record if it fails.
pub async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let session_id = validate_session_id(session_id)?;
    if body.is_empty() {
        return Err(ApiError::EmptyBody);
    }
    serde_json::from_slice::<serde_json::Value>(&body)
        .map_err(|e| ApiError::MalformedJson(e.to_string()))?;

    let upstream = state.upstream.clone();
    let subscription = state
        .tap
        .subscribe(session_id, async move { upstream.open_stream(body).await });

    let stream = subscription.into_stream().map(Ok::<Bytes, std::io::Error>);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// GET /v1/sessions/:session_id/poll -> 200 decorated result, or 204
pub async fn poll_result(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = validate_session_id(session_id)?;
    Ok(match state.registry().dequeue_one(&session_id) {
        Some(result) => Json(state.decorator.decorate(result)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// GET /v1/sessions/:session_id/results -> queued results, not consumed
pub async fn peek_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let session_id = validate_session_id(session_id)?;
    Ok(Json(state.registry().peek_all(&session_id)).into_response())
}

/// GET /v1/sessions/:session_id
pub async fn session_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session_id = validate_session_id(session_id)?;
    let registry = state.registry();
    Ok(Json(SessionView {
        exists: registry.exists(&session_id),
        size: registry.size(&session_id),
        outcome: registry.outcome(&session_id),
        session_id,
    }))
}

/// DELETE /v1/sessions/:session_id
pub async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearedView>, ApiError> {
    let session_id = validate_session_id(session_id)?;
    let cleared = state.registry().clear(&session_id);
    Ok(Json(ClearedView {
        session_id,
        cleared,
    }))
}

/// GET /v1/stats
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry().stats())
}

/// GET /v1/tool-calls/:call_id
pub async fn tool_call(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.names().get(&call_id) {
        Some(entry) => Ok(Json(entry).into_response()),
        None => Err(ApiError::UnknownToolCall(call_id)),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "unknown path")
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/heartbeat", get(heartbeat))
        .route("/v1/stats", get(stats))
        .route(
            "/v1/sessions/:session_id",
            get(session_info).delete(clear_session),
        )
        .route("/v1/sessions/:session_id/stream", post(stream_session))
        .route("/v1/sessions/:session_id/poll", get(poll_result))
        .route("/v1/sessions/:session_id/results", get(peek_results))
        .route("/v1/tool-calls/:call_id", get(tool_call))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
