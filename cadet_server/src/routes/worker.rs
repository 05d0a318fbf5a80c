use crate::error::ApiError;
use crate::server::AppState;
use axum::Extension;
use axum::Json;
use axum::extract::Query;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use cadet_core::{IngestEvent, WorkerCommand};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_WAIT_MS: u64 = 25_000;
const MAX_WAIT_MS: u64 = 60_000;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/worker/commands", get(take_commands))
        .route("/worker/events", post(push_event))
}

#[derive(Debug, Deserialize)]
pub struct CommandsQuery {
    /// How long to hold the request open when no command is queued.
    pub wait_ms: Option<u64>,
}

/// Hand the worker every queued command, waiting up to `wait_ms` for the
/// first one. An empty array means nothing arrived in time.
///
/// Commands leave the queue when they are taken, so delivery is at most once:
/// a worker that drops the response loses them and the matching refreshes
/// run into their timeout.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn take_commands(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<CommandsQuery>,
) -> Result<Json<Vec<WorkerCommand>>, ApiError> {
    authorize(&state, &headers)?;
    let wait = Duration::from_millis(q.wait_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS));
    let mut rx = state.worker_commands.lock().await;

    let mut out = Vec::new();
    if let Ok(Some(first)) = tokio::time::timeout(wait, rx.recv()).await {
        out.push(first);
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
    }
    if !out.is_empty() {
        tracing::debug!(commands = out.len(), "handed commands to worker");
    }
    Ok(Json(out))
}

/// Queue one worker update for the ingest loop.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn push_event(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<IngestEvent>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    authorize(&state, &headers)?;
    tracing::debug!(kind = event.kind(), "queue ingest event");
    state
        .ingest
        .send(event)
        .await
        .map_err(|_| ApiError::IngestClosed)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "queued" })),
    ))
}

/// With a worker token configured, `/worker/*` requires `Authorization: Bearer <token>`.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.worker_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim);
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
