use crate::error::ApiError;
use crate::routes::data::with_data_index;
use crate::server::AppState;
use axum::Extension;
use axum::response::Response;
use axum::routing::get;
use std::sync::Arc;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new().route("/poll", get(poll))
}

/// Long-poll: held open until the next store change or poll timer tick,
/// then answered with the `/data` snapshot.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn poll(Extension(state): Extension<Arc<AppState>>) -> Result<Response, ApiError> {
    let delivery = state.broker.poll().await?;
    Ok(with_data_index(delivery.version, &delivery.snapshot.tables))
}
