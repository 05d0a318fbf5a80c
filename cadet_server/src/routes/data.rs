use crate::server::AppState;
use axum::Extension;
use axum::Json;
use axum::http::HeaderName;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use cadet_core::Version;
use serde::Serialize;
use std::sync::Arc;

/// Version at which a data-bearing response was computed.
pub const DATA_INDEX: HeaderName = HeaderName::from_static("x-data-index");

/// JSON response tagged with `X-Data-Index`.
pub fn with_data_index<T: Serialize>(version: Version, body: T) -> Response {
    ([(DATA_INDEX, version.to_string())], Json(body)).into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/data", get(get_data))
        .route("/cards", get(get_cards))
        .route("/graphs", get(get_graphs))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_data(Extension(state): Extension<Arc<AppState>>) -> Response {
    let snapshot = state.broker.data().await;
    with_data_index(snapshot.version, &snapshot.tables)
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_cards(Extension(state): Extension<Arc<AppState>>) -> Response {
    let snapshot = state.broker.cards().await;
    with_data_index(snapshot.version, &snapshot.tables)
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn get_graphs(Extension(state): Extension<Arc<AppState>>) -> Response {
    let (version, graphs) = state.broker.graphs().await;
    with_data_index(version, graphs)
}
