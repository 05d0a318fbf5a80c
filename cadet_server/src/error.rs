use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cadet_core::error as core_error;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] cadet_core::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ingest queue closed")]
    IngestClosed,

    #[error("missing or invalid worker token")]
    Unauthorized,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::IngestClosed => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Core(err) => match err {
                core_error::Error::InvalidInput(_)
                | core_error::Error::MissingKey { .. }
                | core_error::Error::UnknownCategory(_) => StatusCode::BAD_REQUEST,
                core_error::Error::RefreshTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                core_error::Error::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::warn!(error = %self, status = code.as_u16(), "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}
