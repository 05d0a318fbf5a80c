use crate::error::ApiError;
use crate::routes::data::with_data_index;
use crate::server::AppState;
use axum::Extension;
use axum::extract::Query;
use axum::response::Response;
use axum::routing::get;
use cadet_core::Category;
use serde_json::Value;
use std::sync::Arc;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new().route("/refresh", get(refresh))
}

/// `GET /refresh?<category>=<key>[&...]`
///
/// Asks the worker to refetch every listed entity and answers once all of
/// them have been written back. One parameter yields the record itself,
/// several yield an array in query order.
#[tracing::instrument(level = "info", skip_all)]
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let requests = params
        .into_iter()
        .map(|(category, key)| {
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(ApiError::InvalidInput(format!("empty key for {category}")));
            }
            Ok((category.parse::<Category>()?, key))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let deliveries = state.broker.refresh(&requests).await?;

    let version = deliveries
        .iter()
        .map(|d| d.version)
        .max()
        .unwrap_or(cadet_core::Version::INITIAL);
    let body = if deliveries.len() == 1 {
        deliveries.into_iter().map(|d| d.record).next().unwrap_or(Value::Null)
    } else {
        Value::Array(deliveries.into_iter().map(|d| d.record).collect())
    };
    Ok(with_data_index(version, body))
}
