//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nearsense_models::ModelsError;
use nearsense_sensing::SensingError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sensing error: {0}")]
    Sensing(#[from] SensingError),

    #[error("Config error: {0}")]
    Config(#[from] ModelsError),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Config(_) => StatusCode::BAD_REQUEST,
            ApiError::Sensing(e) if e.is_startup() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Sensing(SensingError::Calibration(_) | SensingError::Config(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Sensing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
