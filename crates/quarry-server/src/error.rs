use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use quarry_core::{AppError, ErrorCategory};

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

/// HTTP status for a failed outcome of the given category.
pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorCategory::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Connection | ErrorCategory::AntiBot | ErrorCategory::Parse => {
            StatusCode::BAD_GATEWAY
        }
        ErrorCategory::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::SerializationError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            other => {
                let category = other.category();
                (status_for(category), category.as_str())
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
