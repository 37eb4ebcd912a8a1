//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use chapterflow::ChapterflowError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_points: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or unknown x-user-id")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Pipeline(#[from] ChapterflowError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Pipeline(err) => match err {
                ChapterflowError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_UPLOAD"),
                ChapterflowError::Extraction(_) => (StatusCode::BAD_REQUEST, "INVALID_ARCHIVE"),
                ChapterflowError::InsufficientBalance { .. } => {
                    (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE")
                }
                ChapterflowError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                ChapterflowError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ChapterflowError::NotReady { .. } => (StatusCode::CONFLICT, "NOT_READY"),
                ChapterflowError::StillRunning { .. } => (StatusCode::CONFLICT, "JOB_ACTIVE"),
                ChapterflowError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
                ChapterflowError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let (required_points, current_points) = match &self {
            ApiError::Pipeline(ChapterflowError::InsufficientBalance { required, current }) => {
                (Some(*required), Some(*current))
            }
            _ => (None, None),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message,
                required_points,
                current_points,
            },
        };
        (status, Json(body)).into_response()
    }
}
