use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::flash::FlashError;
use crate::job::JobError;

/// Errors surfaced synchronously on the request path.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ConcurrencyConflict(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("Upload capacity exceeded")]
    AdmissionExhausted,
    #[error("Insufficient storage")]
    StorageExhausted,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::AdmissionExhausted => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StorageExhausted => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn job_active() -> Self {
        ApiError::ConcurrencyConflict("Busy".to_string())
    }
}

impl From<FlashError> for ApiError {
    fn from(err: FlashError) -> Self {
        match err {
            FlashError::InvalidPath { .. } | FlashError::PathTooLong { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            FlashError::NotFound => ApiError::NotFound("File not found".to_string()),
            FlashError::NoSpace { .. } => ApiError::StorageExhausted,
            FlashError::Io(err) => {
                tracing::error!(error = %err, "flash i/o failed");
                ApiError::Internal("Storage error".to_string())
            }
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::ConcurrencyConflict => ApiError::job_active(),
            JobError::StorageExhausted { .. } => ApiError::StorageExhausted,
            JobError::Container(err) => ApiError::UnsupportedMediaType(err.to_string()),
            JobError::Storage(err) => err.into(),
            other => {
                tracing::error!(error = %other, "job admission failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            )],
            self.to_string(),
        )
            .into_response()
    }
}
