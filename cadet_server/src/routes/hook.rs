use crate::error::ApiError;
use crate::server::AppState;
use axum::Extension;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::routing::post;
use serde_json::Value;
use std::sync::Arc;

const EVENT_HEADER: &str = "x-github-event";

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(max_body_bytes: usize) -> axum::Router {
    axum::Router::new().route(
        "/hook",
        post(hook).layer(DefaultBodyLimit::max(max_body_bytes)),
    )
}

/// Webhook entry point. The payload is handed to the worker as-is and the
/// sender is acknowledged immediately, whatever the body holds.
#[tracing::instrument(level = "info", skip_all)]
pub async fn hook(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    // Form-encoded deliveries are passed through as a string for the worker to decode.
    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };

    tracing::info!(event = event.as_deref().unwrap_or("unknown"), "hook received");
    state.broker.forward_hook(event, payload)?;
    Ok("ok")
}
